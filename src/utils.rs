use std::fmt;

pub struct AppInfo {
    pub app: &'static str,
    pub version: &'static str,
    pub build: &'static str,
}

impl fmt::Display for AppInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "app={} version={} build={}", self.app, self.version, self.build)
    }
}

#[macro_export]
macro_rules! get_app_info {
    () => {{
        const APP: &str = env!("CARGO_CRATE_NAME");
        const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

        #[inline]
        fn git_version() -> &'static str {
            option_env!("GIT_VERSION").unwrap_or("n/a")
        }

        $crate::utils::AppInfo {
            app: APP,
            version: PKG_VERSION,
            build: git_version(),
        }
    }};
}

/// Renders a duration as whole milliseconds for the health table.
pub fn format_millis(d: std::time::Duration) -> String {
    format!("{}ms", d.as_millis())
}
