//! In-process stand-ins for the network collaborators.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::amount::Amount;
use crate::btc::transport::{ExplorerRequest, ExplorerTransport, TransportError};
use crate::btc::{
    BtcExplorer, EndpointSnapshot, ExplorerError, ExplorerTx, PaymentError, PaymentSender,
    TxInput, TxOutput, TxStatus, EXPLORER_PAGE_SIZE,
};
use crate::evm::{ContractClient, ContractError, ContractEvent, EventKind, Receipt, TxInfo};
use crate::oracle::{OracleError, PriceOracle};

pub struct MockTransport {
    url: String,
    response: Mutex<Result<String, TransportError>>,
    delay: Duration,
    calls: AtomicUsize,
    last_path: Mutex<Option<String>>,
}

impl MockTransport {
    pub fn ok(url: &str, body: &str) -> Self {
        Self::with_response(url, Ok(body.to_owned()))
    }

    pub fn failing(url: &str, status: u16) -> Self {
        let err = if status == 429 {
            TransportError::RateLimited
        } else {
            TransportError::Http {
                status,
                body: String::new(),
            }
        };
        Self::with_response(url, Err(err))
    }

    fn with_response(url: &str, response: Result<String, TransportError>) -> Self {
        Self {
            url: url.to_owned(),
            response: Mutex::new(response),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            last_path: Mutex::new(None),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn set_response(&self, response: Result<String, TransportError>) {
        *self.response.lock().unwrap() = response;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_path(&self) -> Option<String> {
        self.last_path.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExplorerTransport for MockTransport {
    async fn send(&self, request: &ExplorerRequest) -> Result<String, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_path.lock().unwrap() = Some(request.path().to_owned());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.response.lock().unwrap().clone()
    }

    fn url(&self) -> &str {
        &self.url
    }
}

/// Esplora-like explorer over a fixed history, newest first.
#[derive(Default)]
pub struct MockExplorer {
    history: Mutex<Vec<ExplorerTx>>,
    balance: Mutex<u64>,
    fail: AtomicBool,
    page_calls: AtomicUsize,
}

impl MockExplorer {
    pub fn new(history: Vec<ExplorerTx>) -> Self {
        Self {
            history: Mutex::new(history),
            ..Default::default()
        }
    }

    /// Adds a transaction on top of the history.
    pub fn push_newest(&self, tx: ExplorerTx) {
        self.history.lock().unwrap().insert(0, tx);
    }

    pub fn set_balance(&self, sats: u64) {
        *self.balance.lock().unwrap() = sats;
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn page_calls(&self) -> usize {
        self.page_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BtcExplorer for MockExplorer {
    async fn get_transactions_by_address(
        &self,
        _address: &str,
        cursor: Option<&str>,
    ) -> Result<Vec<ExplorerTx>, ExplorerError> {
        self.page_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(ExplorerError::NoAvailableEndpoint);
        }
        let history = self.history.lock().unwrap();
        let start = match cursor {
            Some(txid) => match history.iter().position(|tx| tx.txid == txid) {
                Some(pos) => pos + 1,
                None => return Ok(Vec::new()),
            },
            None => 0,
        };
        Ok(history
            .iter()
            .skip(start)
            .take(EXPLORER_PAGE_SIZE)
            .cloned()
            .collect())
    }

    async fn get_balance(&self, _address: &str) -> Result<Amount, ExplorerError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ExplorerError::NoAvailableEndpoint);
        }
        Ok(Amount::sats(*self.balance.lock().unwrap()))
    }

    async fn send_transaction(&self, _raw_tx_hex: &str) -> Result<String, ExplorerError> {
        Err(ExplorerError::NoAvailableEndpoint)
    }

    fn endpoint_snapshots(&self) -> Vec<EndpointSnapshot> {
        Vec::new()
    }
}

/// A confirmed transaction paying `value` from `from` to `to`.
pub fn btc_tx(txid: &str, height: u64, from: &str, to: &str, value: u64) -> ExplorerTx {
    ExplorerTx {
        txid: txid.to_owned(),
        vin: vec![TxInput {
            prevout: Some(TxOutput {
                scriptpubkey_address: Some(from.to_owned()),
                value: value + 1_000,
            }),
        }],
        vout: vec![TxOutput {
            scriptpubkey_address: Some(to.to_owned()),
            value,
        }],
        status: Some(TxStatus {
            confirmed: true,
            block_height: Some(height),
            block_time: Some(1_700_000_000 + height as i64),
        }),
        fee: Some(1_000),
    }
}

pub struct MockContract {
    events: Mutex<Vec<(EventKind, ContractEvent)>>,
    receipts: Mutex<HashMap<String, u64>>,
    senders: Mutex<HashMap<String, String>>,
    head: AtomicU64,
    fail_filter: AtomicBool,
    fail_submit: AtomicBool,
    failing_lookups: Mutex<HashSet<String>>,
    filter_calls: Mutex<Vec<(EventKind, u64, u64)>>,
    submitted: Mutex<Vec<(Amount, String, Amount)>>,
}

impl MockContract {
    pub fn new(head: u64) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            receipts: Mutex::new(HashMap::new()),
            senders: Mutex::new(HashMap::new()),
            head: AtomicU64::new(head),
            fail_filter: AtomicBool::new(false),
            fail_submit: AtomicBool::new(false),
            failing_lookups: Mutex::new(HashSet::new()),
            filter_calls: Mutex::new(Vec::new()),
            submitted: Mutex::new(Vec::new()),
        }
    }

    pub fn push_event(&self, kind: EventKind, event: ContractEvent) {
        self.receipts
            .lock()
            .unwrap()
            .insert(event.transaction_hash.clone(), event.block_number);
        self.events.lock().unwrap().push((kind, event));
    }

    pub fn set_sender(&self, tx_hash: &str, sender: &str) {
        self.senders
            .lock()
            .unwrap()
            .insert(tx_hash.to_owned(), sender.to_owned());
    }

    pub fn set_head(&self, head: u64) {
        self.head.store(head, Ordering::SeqCst);
    }

    pub fn set_filter_failing(&self, fail: bool) {
        self.fail_filter.store(fail, Ordering::SeqCst);
    }

    pub fn set_submit_failing(&self, fail: bool) {
        self.fail_submit.store(fail, Ordering::SeqCst);
    }

    /// Makes `get_transaction_by_hash` fail for `tx_hash` until cleared.
    pub fn set_lookup_failing(&self, tx_hash: &str, fail: bool) {
        let mut failing = self.failing_lookups.lock().unwrap();
        if fail {
            failing.insert(tx_hash.to_owned());
        } else {
            failing.remove(tx_hash);
        }
    }

    pub fn filter_calls(&self) -> Vec<(EventKind, u64, u64)> {
        self.filter_calls.lock().unwrap().clone()
    }

    pub fn submitted(&self) -> Vec<(Amount, String, Amount)> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContractClient for MockContract {
    async fn filter_events(
        &self,
        kind: EventKind,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<ContractEvent>, ContractError> {
        self.filter_calls
            .lock()
            .unwrap()
            .push((kind, from_block, to_block));
        if self.fail_filter.load(Ordering::SeqCst) {
            return Err(ContractError::Transport("connection refused".into()));
        }
        Ok(self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, e)| {
                *k == kind && e.block_number >= from_block && e.block_number <= to_block
            })
            .map(|(_, e)| e.clone())
            .collect())
    }

    async fn get_transaction_receipt(&self, hash: &str) -> Result<Receipt, ContractError> {
        match self.receipts.lock().unwrap().get(hash) {
            Some(block) => Ok(Receipt {
                block_number: *block,
            }),
            None => Err(ContractError::NotFound(hash.to_owned())),
        }
    }

    async fn get_transaction_by_hash(&self, hash: &str) -> Result<TxInfo, ContractError> {
        if self.failing_lookups.lock().unwrap().contains(hash) {
            return Err(ContractError::Rpc {
                code: -32000,
                message: "header not found".into(),
            });
        }
        let sender = self
            .senders
            .lock()
            .unwrap()
            .get(hash)
            .cloned()
            .unwrap_or_else(|| "0x00000000000000000000000000000000000000ff".to_owned());
        Ok(TxInfo {
            sender,
            chain_id: Some(8453),
        })
    }

    async fn block_number(&self) -> Result<u64, ContractError> {
        Ok(self.head.load(Ordering::SeqCst))
    }

    async fn submit_swap(
        &self,
        icy_amount: &Amount,
        btc_address: &str,
        sat_amount: &Amount,
    ) -> Result<String, ContractError> {
        if self.fail_submit.load(Ordering::SeqCst) {
            return Err(ContractError::Transport("nonce too low".into()));
        }
        let mut submitted = self.submitted.lock().unwrap();
        submitted.push((*icy_amount, btc_address.to_owned(), *sat_amount));
        Ok(format!("0xswap{}", submitted.len()))
    }
}

pub struct MockOracle {
    price: Mutex<Option<Amount>>,
}

impl MockOracle {
    pub fn new(price: Amount) -> Self {
        Self {
            price: Mutex::new(Some(price)),
        }
    }

    pub fn set_unavailable(&self) {
        *self.price.lock().unwrap() = None;
    }

    pub fn set_price(&self, price: Amount) {
        *self.price.lock().unwrap() = Some(price);
    }
}

#[async_trait]
impl PriceOracle for MockOracle {
    async fn get_realtime_icy_btc(&self) -> Result<Amount, OracleError> {
        self.price
            .lock()
            .unwrap()
            .ok_or_else(|| OracleError::Request("oracle unavailable".into()))
    }
}

#[derive(Default)]
pub struct MockPaymentSender {
    fail: AtomicBool,
    sent: Mutex<Vec<(String, Amount)>>,
}

impl MockPaymentSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<(String, Amount)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentSender for MockPaymentSender {
    async fn send_payment(
        &self,
        address: &str,
        amount: &Amount,
    ) -> Result<(String, Amount), PaymentError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PaymentError::Send("wallet locked".into()));
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push((address.to_owned(), *amount));
        Ok((format!("btctx{}", sent.len()), Amount::sats(250)))
    }
}
