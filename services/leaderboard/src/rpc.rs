//! Ethereum JSON-RPC implementation of [`ChainReader`].
//!
//! Only three methods are used: `eth_blockNumber`, `eth_getLogs` and
//! `eth_call` against `getStakeInfo(address)`. Transient failures are
//! retried here with backoff; a breaker stops hammering a provider that keeps
//! failing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use moltrank_core::{metrics, RankConfig, TokenAmount};
use moltrank_resilience::{retry_async_if, CircuitBreaker, RetryConfig};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use sha3::{Digest, Keccak256};
use tracing::{debug, instrument};

use crate::address::Address;
use crate::chain::{BlockRange, ChainError, ChainReader, EventKind, EventLog, StakeInfo};

const GET_STAKE_INFO: &str = "getStakeInfo(address)";
const STAKE_INFO_WORDS: usize = 6;

#[derive(Debug, Clone)]
pub struct RpcSettings {
    pub url: String,
    pub contract: Address,
    pub request_timeout: Duration,
    pub retry: RetryConfig,
    pub breaker_failure_threshold: u32,
    pub breaker_open: Duration,
}

impl RpcSettings {
    pub fn from_config(cfg: &RankConfig, contract: Address) -> Self {
        Self {
            url: cfg.rpc_url.clone(),
            contract,
            request_timeout: Duration::from_millis(cfg.rpc_request_timeout_ms),
            retry: RetryConfig { max_retries: cfg.rpc_max_retries, base_delay: Duration::from_millis(cfg.rpc_retry_base_delay_ms), ..RetryConfig::default() },
            breaker_failure_threshold: cfg.breaker_failure_threshold,
            breaker_open: Duration::from_secs(cfg.breaker_open_secs),
        }
    }

    /// Longest one logical call can take: every attempt timing out plus the
    /// worst-case backoff between them. Caller deadlines shorter than this cut
    /// retries off.
    pub fn call_budget(&self) -> Duration {
        let attempts = u32::try_from(self.retry.max_retries.saturating_add(1)).unwrap_or(u32::MAX);
        self.request_timeout.saturating_mul(attempts).saturating_add(self.retry.max_total_delay())
    }
}

pub struct JsonRpcChain {
    http: reqwest::Client,
    settings: RpcSettings,
    breaker: CircuitBreaker,
    next_id: AtomicU64,
    stake_info_selector: [u8; 4],
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLog {
    topics: Vec<String>,
    #[serde(default)]
    block_number: Option<String>,
    #[serde(default)]
    removed: bool,
}

impl JsonRpcChain {
    pub fn new(settings: RpcSettings) -> Result<Self, ChainError> {
        let http = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| ChainError::Transport(e.to_string()))?;
        let breaker = CircuitBreaker::new(settings.breaker_failure_threshold, settings.breaker_open);
        Ok(Self { http, settings, breaker, next_id: AtomicU64::new(1), stake_info_selector: selector(GET_STAKE_INFO) })
    }

    async fn call<T: DeserializeOwned>(&self, method: &'static str, params: Value) -> Result<T, ChainError> {
        let permit = self.breaker.check().map_err(|_| ChainError::CircuitOpen)?;
        let result = retry_async_if(&self.settings.retry, |attempt| {
            let params = params.clone();
            if attempt > 0 { metrics::record_rpc_retry(); }
            async move { self.send(method, params).await }
        }, ChainError::is_transient).await;
        match &result {
            Err(e) if e.is_transient() => permit.failure(),
            _ => permit.success(),
        }
        let value = result?;
        serde_json::from_value(value).map_err(|e| ChainError::Decode(format!("{method}: {e}")))
    }

    async fn send(&self, method: &'static str, params: Value) -> Result<Value, ChainError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        let resp = self.http.post(&self.settings.url).json(&body).send().await.map_err(|e| {
            if e.is_timeout() { ChainError::Timeout(self.settings.request_timeout) } else { ChainError::Transport(e.to_string()) }
        })?;
        let status = resp.status();
        if status.as_u16() == 429 { return Err(ChainError::RateLimited); }
        if !status.is_success() { return Err(ChainError::Http(status.as_u16())); }
        let parsed: RpcResponse = resp.json().await.map_err(|e| ChainError::Decode(e.to_string()))?;
        if let Some(err) = parsed.error {
            debug!(method, code = err.code, message = %err.message, "rpc error");
            return Err(ChainError::Rpc { code: err.code, message: err.message });
        }
        parsed.result.ok_or_else(|| ChainError::Decode(format!("{method}: missing result")))
    }
}

#[async_trait]
impl ChainReader for JsonRpcChain {
    #[instrument(skip(self))]
    async fn current_height(&self) -> Result<u64, ChainError> {
        let quantity: String = self.call("eth_blockNumber", json!([])).await?;
        parse_quantity(&quantity)
    }

    #[instrument(skip(self, range), fields(range = %range))]
    async fn query_events(&self, kind: EventKind, range: BlockRange) -> Result<Vec<EventLog>, ChainError> {
        let filter = json!([{
            "address": self.settings.contract.to_lower_hex(),
            "topics": [format!("0x{}", hex::encode(event_topic(kind.signature())))],
            "fromBlock": format!("{:#x}", range.from),
            "toBlock": format!("{:#x}", range.to),
        }]);
        let logs: Vec<RawLog> = self.call("eth_getLogs", filter).await?;
        logs.iter().filter(|l| !l.removed).map(decode_log).collect()
    }

    #[instrument(skip(self, agent), fields(agent = %agent))]
    async fn stake_info(&self, agent: &Address) -> Result<Option<StakeInfo>, ChainError> {
        let mut data = Vec::with_capacity(36);
        data.extend_from_slice(&self.stake_info_selector);
        data.extend_from_slice(&agent.to_word());
        let params = json!([
            { "to": self.settings.contract.to_lower_hex(), "data": format!("0x{}", hex::encode(data)) },
            "latest"
        ]);
        match self.call::<String>("eth_call", params).await {
            Ok(ret) => decode_stake_info(&parse_bytes(&ret)?),
            Err(ChainError::Rpc { code, message }) if is_revert(code, &message) => {
                debug!(code, %message, "getStakeInfo reverted");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

fn is_revert(code: i64, message: &str) -> bool { code == 3 || message.contains("execution reverted") }

pub fn event_topic(signature: &str) -> [u8; 32] { Keccak256::digest(signature.as_bytes()).into() }

pub fn selector(signature: &str) -> [u8; 4] {
    let hash = Keccak256::digest(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

pub fn parse_quantity(text: &str) -> Result<u64, ChainError> {
    let digits = text.strip_prefix("0x").ok_or_else(|| ChainError::Decode(format!("quantity without 0x: {text}")))?;
    if digits.is_empty() { return Err(ChainError::Decode("empty quantity".into())); }
    u64::from_str_radix(digits, 16).map_err(|e| ChainError::Decode(format!("quantity {text}: {e}")))
}

fn parse_bytes(text: &str) -> Result<Vec<u8>, ChainError> {
    let digits = text.strip_prefix("0x").unwrap_or(text);
    hex::decode(digits).map_err(|e| ChainError::Decode(format!("return data: {e}")))
}

fn parse_word(text: &str) -> Result<[u8; 32], ChainError> {
    let bytes = parse_bytes(text)?;
    bytes.try_into().map_err(|b: Vec<u8>| ChainError::Decode(format!("topic of {} bytes", b.len())))
}

fn decode_log(log: &RawLog) -> Result<EventLog, ChainError> {
    let topic = log.topics.get(1).ok_or_else(|| ChainError::Decode("log without indexed agent".into()))?;
    let agent = Address::from_word(&parse_word(topic)?);
    let block_number = log.block_number.as_deref().map(parse_quantity).transpose()?.unwrap_or_default();
    Ok(EventLog { agent, block_number })
}

fn word_u128(word: &[u8]) -> Result<u128, ChainError> {
    if word[..16].iter().any(|b| *b != 0) { return Err(ChainError::Decode("uint256 exceeds u128".into())); }
    let mut buf = [0u8; 16];
    buf.copy_from_slice(&word[16..32]);
    Ok(u128::from_be_bytes(buf))
}

fn word_u64(word: &[u8]) -> Result<u64, ChainError> {
    u64::try_from(word_u128(word)?).map_err(|_| ChainError::Decode("uint256 exceeds u64".into()))
}

/// `(amount, stakedAt, slashCount, totalSlashed, pendingUnstake, unstakeAvailableAt)`.
/// Empty return data means there is no contract code at the address.
pub fn decode_stake_info(data: &[u8]) -> Result<Option<StakeInfo>, ChainError> {
    if data.is_empty() { return Ok(None); }
    if data.len() < STAKE_INFO_WORDS * 32 {
        return Err(ChainError::Decode(format!("getStakeInfo returned {} bytes", data.len())));
    }
    let words: Vec<&[u8]> = data.chunks(32).take(STAKE_INFO_WORDS).collect();
    Ok(Some(StakeInfo {
        amount: TokenAmount::from_wei(word_u128(words[0])?),
        staked_at: word_u64(words[1])?,
        slash_count: word_u64(words[2])?,
        total_slashed: TokenAmount::from_wei(word_u128(words[3])?),
        pending_unstake: TokenAmount::from_wei(word_u128(words[4])?),
        unstake_available_at: word_u64(words[5])?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(v: u128) -> [u8; 32] {
        let mut w = [0u8; 32];
        w[16..].copy_from_slice(&v.to_be_bytes());
        w
    }

    #[test]
    fn keccak_vectors() {
        assert_eq!(hex::encode(event_topic("Transfer(address,address,uint256)")), "ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef");
        assert_eq!(hex::encode(selector("transfer(address,uint256)")), "a9059cbb");
    }

    #[test]
    fn quantities() {
        assert_eq!(parse_quantity("0x0").unwrap(), 0);
        assert_eq!(parse_quantity("0x27a6a4c").unwrap(), 41_577_036);
        assert!(parse_quantity("27a6a4c").is_err());
        assert!(parse_quantity("0x").is_err());
    }

    #[test]
    fn stake_info_decodes_six_words() {
        let mut data = Vec::new();
        for v in [50_000u128 * 1_000_000_000_000_000_000, 1_700_000_000, 2, 7, 0, 0] { data.extend_from_slice(&word(v)); }
        let info = decode_stake_info(&data).unwrap().unwrap();
        assert_eq!(info.amount, TokenAmount::from_tokens(50_000));
        assert_eq!(info.staked_at, 1_700_000_000);
        assert_eq!(info.slash_count, 2);
        assert_eq!(info.total_slashed, TokenAmount::from_wei(7));
    }

    #[test]
    fn stake_info_edge_cases() {
        assert_eq!(decode_stake_info(&[]).unwrap(), None);
        assert!(decode_stake_info(&[0u8; 64]).is_err());
        let mut huge = vec![0u8; 192];
        huge[0] = 1;
        assert!(decode_stake_info(&huge).is_err());
    }

    #[test]
    fn log_agent_from_topic() {
        let agent: Address = "0xca6e9a01c6b7e52e56461807336b36beff08e5b0".parse().unwrap();
        let log = RawLog {
            topics: vec![format!("0x{}", hex::encode(event_topic(EventKind::Staked.signature()))), format!("0x{}", hex::encode(agent.to_word()))],
            block_number: Some("0x10".into()),
            removed: false,
        };
        assert_eq!(decode_log(&log).unwrap(), EventLog { agent, block_number: 16 });
        let bare = RawLog { topics: vec!["0x00".into()], block_number: None, removed: false };
        assert!(decode_log(&bare).is_err());
    }

    /// Canned reply per accepted connection; the last one repeats. `None`
    /// accepts the request and never answers.
    async fn stub_provider(replies: Vec<Option<&'static str>>) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut served = 0usize;
            loop {
                let Ok((mut sock, _)) = listener.accept().await else { return };
                let reply = replies[served.min(replies.len() - 1)];
                served += 1;
                tokio::spawn(async move {
                    let mut req = Vec::new();
                    let mut buf = [0u8; 1024];
                    loop {
                        let Ok(n) = sock.read(&mut buf).await else { return };
                        if n == 0 { return; }
                        req.extend_from_slice(&buf[..n]);
                        let text = String::from_utf8_lossy(&req).to_ascii_lowercase();
                        if let Some(end) = text.find("\r\n\r\n") {
                            let body_len = text
                                .lines()
                                .find_map(|l| l.strip_prefix("content-length:"))
                                .and_then(|v| v.trim().parse::<usize>().ok())
                                .unwrap_or(0);
                            if req.len() >= end + 4 + body_len { break; }
                        }
                    }
                    match reply {
                        Some(resp) => { let _ = sock.write_all(resp.as_bytes()).await; let _ = sock.shutdown().await; }
                        None => tokio::time::sleep(Duration::from_secs(60)).await,
                    }
                });
            }
        });
        format!("http://{addr}")
    }

    const UNAVAILABLE: &str = "HTTP/1.1 503 Service Unavailable\r\ncontent-length: 0\r\nconnection: close\r\n\r\n";
    const HEAD_0X10: &str = "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 40\r\nconnection: close\r\n\r\n{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":\"0x10\"}";

    fn stub_settings(url: String, retry: RetryConfig) -> RpcSettings {
        RpcSettings {
            url,
            contract: Address::ZERO,
            request_timeout: Duration::from_secs(5),
            retry,
            breaker_failure_threshold: 1,
            breaker_open: Duration::from_millis(50),
        }
    }

    #[tokio::test]
    async fn breaker_recovers_after_trial_cut_by_caller_deadline() {
        let url = stub_provider(vec![Some(UNAVAILABLE), None, Some(HEAD_0X10)]).await;
        let chain = JsonRpcChain::new(stub_settings(url, RetryConfig::none())).unwrap();

        assert_eq!(chain.current_height().await, Err(ChainError::Http(503)));
        assert_eq!(chain.current_height().await, Err(ChainError::CircuitOpen));

        tokio::time::sleep(Duration::from_millis(80)).await;
        let cut = tokio::time::timeout(Duration::from_millis(100), chain.current_height()).await;
        assert!(cut.is_err());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(chain.current_height().await, Ok(16));
        assert_eq!(chain.current_height().await, Ok(16));
    }

    #[tokio::test]
    async fn transient_error_is_retried_within_call_deadline() {
        let url = stub_provider(vec![Some(UNAVAILABLE), Some(HEAD_0X10)]).await;
        let retry = RetryConfig { max_retries: 2, base_delay: Duration::from_millis(20), max_delay: Duration::from_millis(100), jitter: 0.25 };
        let mut settings = stub_settings(url, retry);
        settings.breaker_failure_threshold = 5;
        settings.request_timeout = Duration::from_millis(500);
        let deadline = settings.call_budget();
        let chain = JsonRpcChain::new(settings).unwrap();

        let head = tokio::time::timeout(deadline, chain.current_height()).await;
        assert_eq!(head, Ok(Ok(16)));
    }

    #[test]
    fn call_budget_covers_attempts_and_backoff() {
        let retry = RetryConfig { max_retries: 2, base_delay: Duration::from_millis(200), max_delay: Duration::from_secs(2), jitter: 0.25 };
        let settings = RpcSettings { request_timeout: Duration::from_secs(2), ..stub_settings(String::new(), retry) };
        assert_eq!(settings.call_budget(), Duration::from_millis(3 * 2_000 + 250 + 500));
    }

    #[test]
    fn revert_detection() {
        assert!(is_revert(3, "execution reverted"));
        assert!(is_revert(-32000, "execution reverted: no stake"));
        assert!(!is_revert(-32005, "limit exceeded"));
    }
}
