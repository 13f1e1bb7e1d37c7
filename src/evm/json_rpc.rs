//! `ContractClient` over plain Ethereum JSON-RPC.
//!
//! Logs come from `eth_getLogs` and are decoded with dynamic ABI types. The
//! swap call is sent with `eth_sendTransaction` from the operator account,
//! which the node signs.

use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use alloy_core::dyn_abi::{DynSolType, DynSolValue};
use alloy_primitives::{hex, keccak256, Address, B256, U256};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{
    normalize_address, parse_hex_u64, ContractClient, ContractError, ContractEvent, EventData,
    EventKind, Receipt, TxInfo, SWAP_EVENT, SWAP_FUNCTION, TRANSFER_EVENT,
};
use crate::amount::{Amount, BTC_DECIMALS, ICY_DECIMALS};
use crate::config;

/// A raw log as returned by `eth_getLogs`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawLog {
    pub topics: Vec<String>,
    pub data: String,
    #[serde(rename = "blockNumber")]
    pub block_number: String,
    #[serde(rename = "transactionHash")]
    pub transaction_hash: String,
    #[serde(rename = "logIndex")]
    pub log_index: String,
    #[serde(default)]
    pub removed: Option<bool>,
}

pub struct EvmJsonRpcClient {
    url: String,
    http: reqwest::Client,
    icy_token: String,
    swap_contract: String,
    operator: String,
    next_id: AtomicU64,
}

impl EvmJsonRpcClient {
    pub fn new(cfg: &config::EVMConfig) -> Result<Self, ContractError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(|err| ContractError::Transport(err.to_string()))?;

        Ok(Self {
            url: cfg.rpc_url.clone(),
            http,
            icy_token: normalize_address(&cfg.icy_token_address),
            swap_contract: normalize_address(&cfg.swap_contract_address),
            operator: normalize_address(&cfg.operator_address),
            next_id: AtomicU64::new(1),
        })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, ContractError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let resp = self
            .http
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|err| ContractError::Transport(err.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ContractError::Transport(format!("HTTP {}: {}", status, body)));
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|err| ContractError::Decode(err.to_string()))?;
        parse_response(body)
    }

    fn event_address(&self, kind: EventKind) -> &str {
        match kind {
            EventKind::IcyTransfer => &self.icy_token,
            EventKind::Swap => &self.swap_contract,
        }
    }
}

#[async_trait]
impl ContractClient for EvmJsonRpcClient {
    async fn filter_events(
        &self,
        kind: EventKind,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<ContractEvent>, ContractError> {
        let filter = json!({
            "address": self.event_address(kind),
            "fromBlock": format!("{:#x}", from_block),
            "toBlock": format!("{:#x}", to_block),
            "topics": [event_topic(kind)],
        });
        let result = self.call("eth_getLogs", json!([filter])).await?;
        let logs: Vec<RawLog> =
            serde_json::from_value(result).map_err(|err| ContractError::Decode(err.to_string()))?;

        debug!(
            "Fetched logs: event={} from={} to={} count={}",
            kind,
            from_block,
            to_block,
            logs.len()
        );
        decode_logs(kind, &logs)
    }

    async fn get_transaction_receipt(&self, hash: &str) -> Result<Receipt, ContractError> {
        let result = self
            .call("eth_getTransactionReceipt", json!([hash]))
            .await?;
        if result.is_null() {
            return Err(ContractError::NotFound(hash.to_owned()));
        }
        let block_number = result["blockNumber"]
            .as_str()
            .ok_or_else(|| ContractError::Decode(format!("receipt without block: {}", hash)))?;
        Ok(Receipt {
            block_number: parse_hex_u64(block_number)?,
        })
    }

    async fn get_transaction_by_hash(&self, hash: &str) -> Result<TxInfo, ContractError> {
        let result = self
            .call("eth_getTransactionByHash", json!([hash]))
            .await?;
        if result.is_null() {
            return Err(ContractError::NotFound(hash.to_owned()));
        }
        let sender = result["from"]
            .as_str()
            .ok_or_else(|| ContractError::Decode(format!("transaction without sender: {}", hash)))?;
        let chain_id = match result["chainId"].as_str() {
            Some(id) => Some(parse_hex_u64(id)?),
            None => None,
        };
        Ok(TxInfo {
            sender: normalize_address(sender),
            chain_id,
        })
    }

    async fn block_number(&self) -> Result<u64, ContractError> {
        let result = self.call("eth_blockNumber", json!([])).await?;
        let head = result
            .as_str()
            .ok_or_else(|| ContractError::Decode("block number is not a string".to_owned()))?;
        parse_hex_u64(head)
    }

    async fn submit_swap(
        &self,
        icy_amount: &Amount,
        btc_address: &str,
        sat_amount: &Amount,
    ) -> Result<String, ContractError> {
        if icy_amount.decimals != ICY_DECIMALS || sat_amount.decimals != BTC_DECIMALS {
            return Err(ContractError::InvalidInput(format!(
                "unexpected decimals: icy={} btc={}",
                icy_amount.decimals, sat_amount.decimals
            )));
        }
        let calldata = encode_swap_call(icy_amount.value, btc_address, sat_amount.value);
        let tx = json!({
            "from": self.operator,
            "to": self.swap_contract,
            "data": hex::encode_prefixed(calldata),
        });

        let result = self.call("eth_sendTransaction", json!([tx])).await?;
        let hash = result
            .as_str()
            .ok_or_else(|| ContractError::Decode("transaction hash is not a string".to_owned()))?;
        info!(
            "Swap submitted: tx_hash={} btc_address={} sats={}",
            hash, btc_address, sat_amount.value
        );
        Ok(hash.to_owned())
    }
}

fn parse_response(body: Value) -> Result<Value, ContractError> {
    if let Some(err) = body.get("error") {
        return Err(ContractError::Rpc {
            code: err["code"].as_i64().unwrap_or_default(),
            message: err["message"].as_str().unwrap_or_default().to_owned(),
        });
    }
    Ok(body.get("result").cloned().unwrap_or(Value::Null))
}

pub fn event_topic(kind: EventKind) -> String {
    let signature = match kind {
        EventKind::IcyTransfer => TRANSFER_EVENT,
        EventKind::Swap => SWAP_EVENT,
    };
    hex::encode_prefixed(keccak256(signature.as_bytes()))
}

pub fn encode_swap_call(icy_amount: U256, btc_address: &str, sat_amount: U256) -> Vec<u8> {
    let selector = keccak256(SWAP_FUNCTION.as_bytes());
    let args = DynSolValue::Tuple(vec![
        DynSolValue::Uint(icy_amount, 256),
        DynSolValue::String(btc_address.to_owned()),
        DynSolValue::Uint(sat_amount, 256),
    ]);
    let mut data = selector[..4].to_vec();
    data.extend(args.abi_encode_params());
    data
}

/// Decodes logs, dropping the ones a reorg removed. A log whose payload can't
/// be decoded is kept as [`EventData::Undecodable`] so the caller can report it.
pub fn decode_logs(kind: EventKind, logs: &[RawLog]) -> Result<Vec<ContractEvent>, ContractError> {
    let mut events = Vec::with_capacity(logs.len());
    for log in logs.iter() {
        if log.removed.unwrap_or(false) {
            continue;
        }
        let data = match decode_payload(kind, log) {
            Ok(data) => data,
            Err(reason) => EventData::Undecodable(reason),
        };
        events.push(ContractEvent {
            transaction_hash: log.transaction_hash.to_lowercase(),
            block_number: parse_hex_u64(&log.block_number)?,
            log_index: parse_hex_u64(&log.log_index)?,
            data,
        });
    }
    Ok(events)
}

fn decode_payload(kind: EventKind, log: &RawLog) -> Result<EventData, String> {
    let data = hex::decode(&log.data).map_err(|err| err.to_string())?;
    match kind {
        EventKind::IcyTransfer => {
            if log.topics.len() != 3 {
                return Err(format!("transfer with {} topics", log.topics.len()));
            }
            if data.len() != 32 {
                return Err(format!("transfer data of {} bytes", data.len()));
            }
            Ok(EventData::Transfer {
                from: topic_address(&log.topics[1])?,
                to: topic_address(&log.topics[2])?,
                value: U256::from_be_slice(&data),
            })
        }
        EventKind::Swap => {
            let ty = DynSolType::Tuple(vec![
                DynSolType::Uint(256),
                DynSolType::String,
                DynSolType::Uint(256),
            ]);
            let decoded = ty.abi_decode_params(&data).map_err(|err| err.to_string())?;
            let DynSolValue::Tuple(values) = decoded else {
                return Err("swap payload is not a tuple".to_owned());
            };
            match values.as_slice() {
                [DynSolValue::Uint(icy_amount, _), DynSolValue::String(btc_address), DynSolValue::Uint(btc_amount, _)] => {
                    Ok(EventData::Swap {
                        icy_amount: *icy_amount,
                        btc_address: btc_address.clone(),
                        btc_amount: *btc_amount,
                    })
                }
                _ => Err("unexpected swap payload".to_owned()),
            }
        }
    }
}

fn topic_address(topic: &str) -> Result<String, String> {
    let word = B256::from_str(topic).map_err(|err| err.to_string())?;
    Ok(normalize_address(&Address::from_word(word).to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FROM: &str = "0x000000000000000000000000aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const TO: &str = "0x000000000000000000000000bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    fn raw_log(topics: Vec<String>, data: Vec<u8>) -> RawLog {
        RawLog {
            topics,
            data: hex::encode_prefixed(data),
            block_number: "0x64".into(),
            transaction_hash: "0xABCDEF".into(),
            log_index: "0x2".into(),
            removed: None,
        }
    }

    #[test]
    fn decodes_transfer_log() {
        let value = U256::from(1_500u64);
        let log = raw_log(
            vec![event_topic(EventKind::IcyTransfer), FROM.into(), TO.into()],
            value.to_be_bytes::<32>().to_vec(),
        );
        let events = decode_logs(EventKind::IcyTransfer, &[log]).unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].block_number, 100);
        assert_eq!(events[0].log_index, 2);
        assert_eq!(events[0].transaction_hash, "0xabcdef");
        assert_eq!(
            events[0].data,
            EventData::Transfer {
                from: "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".into(),
                to: "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb".into(),
                value,
            }
        );
    }

    #[test]
    fn decodes_swap_log() {
        let payload = DynSolValue::Tuple(vec![
            DynSolValue::Uint(U256::from(10u64).pow(U256::from(20u64)), 256),
            DynSolValue::String("tb1qdest".into()),
            DynSolValue::Uint(U256::from(28_571u64), 256),
        ])
        .abi_encode_params();
        let log = raw_log(vec![event_topic(EventKind::Swap)], payload);
        let events = decode_logs(EventKind::Swap, &[log]).unwrap();

        assert_eq!(
            events[0].data,
            EventData::Swap {
                icy_amount: U256::from(10u64).pow(U256::from(20u64)),
                btc_address: "tb1qdest".into(),
                btc_amount: U256::from(28_571u64),
            }
        );
    }

    #[test]
    fn malformed_payload_is_marked_undecodable() {
        let log = raw_log(vec![event_topic(EventKind::Swap)], vec![1, 2, 3]);
        let events = decode_logs(EventKind::Swap, &[log]).unwrap();
        assert!(matches!(events[0].data, EventData::Undecodable(_)));
    }

    #[test]
    fn removed_logs_are_dropped() {
        let mut log = raw_log(
            vec![event_topic(EventKind::IcyTransfer), FROM.into(), TO.into()],
            U256::from(1u64).to_be_bytes::<32>().to_vec(),
        );
        log.removed = Some(true);
        assert!(decode_logs(EventKind::IcyTransfer, &[log]).unwrap().is_empty());
    }

    #[test]
    fn swap_calldata_has_selector_and_arguments() {
        let data = encode_swap_call(U256::from(7u64), "bc1qdest", U256::from(98_000u64));
        let selector = keccak256(SWAP_FUNCTION.as_bytes());
        assert_eq!(&data[..4], &selector[..4]);

        let ty = DynSolType::Tuple(vec![
            DynSolType::Uint(256),
            DynSolType::String,
            DynSolType::Uint(256),
        ]);
        let DynSolValue::Tuple(args) = ty.abi_decode_params(&data[4..]).unwrap() else {
            panic!("expected tuple");
        };
        assert_eq!(args[1], DynSolValue::String("bc1qdest".into()));
        assert_eq!(args[2], DynSolValue::Uint(U256::from(98_000u64), 256));
    }

    #[test]
    fn transfer_topic_is_the_erc20_signature_hash() {
        assert_eq!(
            event_topic(EventKind::IcyTransfer),
            "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"
        );
    }

    #[test]
    fn rpc_error_is_surfaced() {
        let body = json!({"jsonrpc": "2.0", "id": 1, "error": {"code": -32005, "message": "limit exceeded"}});
        match parse_response(body) {
            Err(ContractError::Rpc { code, message }) => {
                assert_eq!(code, -32005);
                assert_eq!(message, "limit exceeded");
            }
            other => panic!("unexpected {:?}", other),
        }
        let ok = parse_response(json!({"jsonrpc": "2.0", "id": 1, "result": "0x10"})).unwrap();
        assert_eq!(ok, json!("0x10"));
    }
}
