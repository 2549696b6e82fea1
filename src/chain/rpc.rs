//! JSON-RPC implementation of the chain capabilities on top of an alloy provider.

use super::{
    BulkTransferContract, ReceiptWaiter, TokenApprover, TokenReader, TxHash, TxStatus,
};
use crate::error::{BatchError, BulkError, ConfigError, Result, RpcError};
use crate::partition::Batch;
use alloy::network::{EthereumWallet, ReceiptResponse, TransactionBuilder};
use alloy::primitives::{Address, Bytes, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use alloy::sol_types::SolCall;
use alloy::transports::http::Http;
use alloy::transports::{RpcError as TransportError, TransportErrorKind};
use async_trait::async_trait;
use reqwest::Client;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};

const RPC_ERR_MAX_LEN: usize = 260;
const READ_ATTEMPTS: u32 = 3;
const READ_BACKOFF_BASE_MS: u64 = 100;
const READ_BACKOFF_CAP_MS: u64 = 1_600;

alloy::sol! {
    interface IERC20 {
        function balanceOf(address owner) external view returns (uint256 balance);
        function allowance(address owner, address spender) external view returns (uint256 remaining);
        function approve(address spender, uint256 amount) external returns (bool);
    }

    interface IBulkSender {
        function bulkSendERC20Different(address token, address[] recipients, uint256[] amounts) external payable;
        function getRecipientLimit() external view returns (uint256 limit);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ReceiptSettings {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for ReceiptSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            poll_interval: Duration::from_secs(1),
        }
    }
}

pub struct RpcChain<P> {
    provider: P,
    sender: Address,
    token: Address,
    contract: Address,
    receipts: ReceiptSettings,
}

/// Builds a signing HTTP provider for `private_key` and wraps it.
pub fn connect_http(
    rpc_url: &str,
    private_key: &str,
    token: Address,
    contract: Address,
    receipts: ReceiptSettings,
) -> Result<RpcChain<impl Provider<Http<Client>>>> {
    let url = rpc_url.parse::<reqwest::Url>().map_err(|err| RpcError::InvalidUrl {
        url: rpc_url.to_string(),
        reason: err.to_string(),
    })?;
    let signer = private_key
        .trim()
        .parse::<PrivateKeySigner>()
        .map_err(|_| ConfigError::InvalidConfig("PRIVATE_KEY is not a valid secp256k1 key".to_string()))?;
    let sender = signer.address();
    let provider = ProviderBuilder::new()
        .with_recommended_fillers()
        .wallet(EthereumWallet::from(signer))
        .on_http(url);
    Ok(RpcChain::new(provider, sender, token, contract, receipts))
}

/// Read-only provider; every write call on the result fails at the node.
pub fn connect_read_only(
    rpc_url: &str,
    token: Address,
    contract: Address,
) -> Result<RpcChain<impl Provider<Http<Client>>>> {
    let url = rpc_url.parse::<reqwest::Url>().map_err(|err| RpcError::InvalidUrl {
        url: rpc_url.to_string(),
        reason: err.to_string(),
    })?;
    let provider = ProviderBuilder::new().on_http(url);
    Ok(RpcChain::new(
        provider,
        Address::ZERO,
        token,
        contract,
        ReceiptSettings::default(),
    ))
}

impl<P> RpcChain<P>
where
    P: Provider<Http<Client>>,
{
    pub fn new(
        provider: P,
        sender: Address,
        token: Address,
        contract: Address,
        receipts: ReceiptSettings,
    ) -> Self {
        Self {
            provider,
            sender,
            token,
            contract,
            receipts,
        }
    }

    pub fn sender(&self) -> Address {
        self.sender
    }

    /// `eth_call` with a short retry loop for transient transport failures.
    async fn eth_call(&self, to: Address, input: Vec<u8>) -> Result<Bytes> {
        let request = TransactionRequest::default()
            .with_to(to)
            .with_input(Bytes::from(input));
        let mut attempt = 0u32;
        loop {
            let message = match self.provider.call(&request).await {
                Ok(raw) => return Ok(raw),
                Err(err) => compact_rpc_error(&err.to_string()),
            };
            attempt += 1;
            if attempt >= READ_ATTEMPTS || !is_retryable_rpc_error(&message) {
                return Err(RpcError::Transport(message).into());
            }
            tracing::debug!("[RPC] eth_call to {to:#x} failed (attempt {attempt}): {message}");
            sleep(Duration::from_millis(bounded_exponential_backoff_ms(
                READ_BACKOFF_BASE_MS,
                attempt,
                READ_BACKOFF_CAP_MS,
            )))
            .await;
        }
    }

    fn bulk_request(&self, batch: &Batch<'_>) -> TransactionRequest {
        let call = IBulkSender::bulkSendERC20DifferentCall {
            token: self.token,
            recipients: batch.recipients(),
            amounts: batch.amounts(),
        };
        TransactionRequest::default()
            .with_from(self.sender)
            .with_to(self.contract)
            .with_input(Bytes::from(call.abi_encode()))
    }

    async fn send(&self, request: TransactionRequest) -> Result<TxHash> {
        let pending = self
            .provider
            .send_transaction(request)
            .await
            .map_err(|err| classify_send_error(&err))?;
        Ok(*pending.tx_hash())
    }
}

#[async_trait]
impl<P> TokenReader for RpcChain<P>
where
    P: Provider<Http<Client>>,
{
    async fn balance_of(&self, owner: Address) -> Result<U256> {
        let call = IERC20::balanceOfCall { owner };
        let raw = self.eth_call(self.token, call.abi_encode()).await?;
        let decoded = <IERC20::balanceOfCall as SolCall>::abi_decode_returns(raw.as_ref(), true)
            .map_err(|err| RpcError::Decode(format!("balanceOf({owner:#x}): {err}")))?;
        Ok(decoded.balance)
    }

    async fn allowance(&self, owner: Address, spender: Address) -> Result<U256> {
        let call = IERC20::allowanceCall { owner, spender };
        let raw = self.eth_call(self.token, call.abi_encode()).await?;
        let decoded = <IERC20::allowanceCall as SolCall>::abi_decode_returns(raw.as_ref(), true)
            .map_err(|err| RpcError::Decode(format!("allowance({owner:#x}, {spender:#x}): {err}")))?;
        Ok(decoded.remaining)
    }
}

#[async_trait]
impl<P> TokenApprover for RpcChain<P>
where
    P: Provider<Http<Client>>,
{
    async fn approve(&self, spender: Address, amount: U256) -> Result<TxHash> {
        let call = IERC20::approveCall { spender, amount };
        let request = TransactionRequest::default()
            .with_from(self.sender)
            .with_to(self.token)
            .with_input(Bytes::from(call.abi_encode()));
        self.send(request).await
    }
}

#[async_trait]
impl<P> BulkTransferContract for RpcChain<P>
where
    P: Provider<Http<Client>>,
{
    fn address(&self) -> Address {
        self.contract
    }

    async fn recipient_limit(&self) -> Result<usize> {
        let raw = self
            .eth_call(self.contract, IBulkSender::getRecipientLimitCall {}.abi_encode())
            .await?;
        let decoded =
            <IBulkSender::getRecipientLimitCall as SolCall>::abi_decode_returns(raw.as_ref(), true)
                .map_err(|err| RpcError::Decode(format!("getRecipientLimit: {err}")))?;
        Ok(decoded.limit.try_into().unwrap_or(usize::MAX))
    }

    async fn simulate(&self, batch: &Batch<'_>) -> Result<()> {
        let request = self.bulk_request(batch);
        match self.provider.call(&request).await {
            Ok(_) => Ok(()),
            Err(err) => Err(RpcError::ExecutionReverted(revert_reason(&err)).into()),
        }
    }

    async fn estimate_gas(&self, batch: &Batch<'_>) -> Result<u64> {
        let request = self.bulk_request(batch);
        self.provider
            .estimate_gas(&request)
            .await
            .map_err(|err| RpcError::Transport(compact_rpc_error(&err.to_string())).into())
    }

    async fn submit(&self, batch: &Batch<'_>, gas_limit: Option<u64>) -> Result<TxHash> {
        let mut request = self.bulk_request(batch);
        if let Some(gas) = gas_limit {
            request = request.with_gas_limit(gas);
        }
        self.send(request).await
    }
}

#[async_trait]
impl<P> ReceiptWaiter for RpcChain<P>
where
    P: Provider<Http<Client>>,
{
    async fn wait_for_receipt(&self, hash: TxHash) -> Result<TxStatus> {
        let started = Instant::now();
        let poll = async {
            loop {
                match self.provider.get_transaction_receipt(hash).await {
                    Ok(Some(receipt)) => {
                        return Ok(if ReceiptResponse::status(&receipt) {
                            TxStatus::Success
                        } else {
                            TxStatus::Reverted
                        });
                    }
                    Ok(None) => {}
                    Err(err) => {
                        let message = compact_rpc_error(&err.to_string());
                        if !is_retryable_rpc_error(&message) {
                            return Err(BulkError::from(RpcError::Transport(message)));
                        }
                        tracing::debug!("[RPC] receipt poll for {hash:#x} failed: {message}");
                    }
                }
                sleep(self.receipts.poll_interval).await;
            }
        };
        match timeout(self.receipts.timeout, poll).await {
            Ok(outcome) => outcome,
            Err(_) => Err(BatchError::ConfirmationTimeout {
                hash,
                waited_ms: started.elapsed().as_millis() as u64,
            }
            .into()),
        }
    }
}

fn classify_send_error(err: &TransportError<TransportErrorKind>) -> BulkError {
    let message = compact_rpc_error(&err.to_string());
    if message.to_ascii_lowercase().contains("revert") {
        RpcError::ExecutionReverted(revert_reason(err)).into()
    } else {
        RpcError::Transport(message).into()
    }
}

/// Best available revert reason: decoded `Error(string)` data, then the node's
/// message, then the compacted transport error.
fn revert_reason(err: &TransportError<TransportErrorKind>) -> String {
    let payload = err.as_error_resp();
    payload
        .and_then(|payload| payload.data.as_ref())
        .and_then(|raw| serde_json::from_str::<String>(raw.get()).ok())
        .and_then(|hex| alloy::hex::decode(hex).ok())
        .and_then(|data| decode_revert_reason(&data))
        .or_else(|| payload.map(|payload| payload.message.to_string()))
        .unwrap_or_else(|| compact_rpc_error(&err.to_string()))
}

fn u256_word_to_usize(word: &[u8]) -> Option<usize> {
    if word.len() != 32 || word[..24].iter().any(|b| *b != 0) {
        return None;
    }
    let mut tail = [0u8; 8];
    tail.copy_from_slice(&word[24..32]);
    usize::try_from(u64::from_be_bytes(tail)).ok()
}

/// Decodes `Error(string)` and `Panic(uint256)` revert payloads.
fn decode_revert_reason(output: &[u8]) -> Option<String> {
    let (selector, args) = output.split_at_checked(4)?;
    match selector {
        [0x08, 0xc3, 0x79, 0xa0] => {
            let offset = u256_word_to_usize(args.get(0..32)?)?;
            let len = u256_word_to_usize(args.get(offset..offset.checked_add(32)?)?)?;
            let start = offset.checked_add(32)?;
            let raw = args.get(start..start.checked_add(len)?)?;
            std::str::from_utf8(raw).ok().map(str::to_string)
        }
        [0x4e, 0x48, 0x7b, 0x71] => {
            let code = u256_word_to_usize(args.get(0..32)?)?;
            Some(format!("panic_code=0x{code:x}"))
        }
        _ => None,
    }
}

fn is_retryable_rpc_error(message: &str) -> bool {
    let msg = message.to_ascii_lowercase();
    let non_retryable = [
        "method not found",
        "-32601",
        "invalid params",
        "-32602",
        "execution reverted",
        "revert",
        "nonce too low",
        "insufficient funds",
        "parse error",
        "-32700",
    ];
    !non_retryable.iter().any(|needle| msg.contains(needle))
}

pub fn bounded_exponential_backoff_ms(base_ms: u64, streak: u32, cap_ms: u64) -> u64 {
    if base_ms == 0 {
        return 0;
    }
    base_ms
        .saturating_mul(1u64 << streak.min(8))
        .min(cap_ms.max(base_ms))
}

/// Collapses whitespace, drops echoed request bodies and backtraces, and caps length.
fn compact_rpc_error(message: &str) -> String {
    let mut raw = message;
    if let Some((prefix, _)) = raw.split_once(" text: ") {
        raw = prefix;
    }
    if let Some((prefix, _)) = raw.split_once("Stack backtrace:") {
        raw = prefix;
    }
    let mut compact = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if compact.len() > RPC_ERR_MAX_LEN {
        let mut cut = RPC_ERR_MAX_LEN;
        while !compact.is_char_boundary(cut) {
            cut -= 1;
        }
        compact.truncate(cut);
        compact.push_str("...(truncated)");
    }
    compact
}
