//! Shared test fixtures for the execution engine.
//!
//! Kept as a standalone crate (no dependency on the engine crate) so both unit
//! tests inside the engine and black-box integration tests can build sample
//! wire payloads without duplicating literal JSON blobs.

use chrono::Utc;
use serde_json::{json, Value};

/// A valid intra-chain opportunity payload, as it would arrive on the durable
/// input stream. Fields can be overridden by mutating the returned `Value`
/// before feeding it into the consumer under test.
pub fn intra_chain_opportunity(id: &str) -> Value {
    json!({
        "id": id,
        "type": "intra-chain",
        "buyChain": "ethereum",
        "buyDex": "uniswap_v3",
        "sellDex": "sushiswap",
        "tokenIn": "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2",
        "tokenOut": "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48",
        "amountIn": "1000000000000000000",
        "expectedProfitUsd": 100.0,
        "confidence": 0.95,
        "timestamp": now_ms(),
    })
}

/// A cross-chain opportunity whose bridge fee is large enough to trip the
/// "fee exceeds half the expected profit" rejection path.
pub fn cross_chain_opportunity_high_fee(id: &str) -> Value {
    json!({
        "id": id,
        "type": "cross-chain",
        "buyChain": "ethereum",
        "sellChain": "arbitrum",
        "buyDex": "uniswap_v3",
        "sellDex": "camelot",
        "tokenIn": "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2",
        "tokenOut": "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48",
        "amountIn": "1000000000000000000",
        "expectedProfitUsd": 100.0,
        "confidence": 0.9,
        "timestamp": now_ms(),
    })
}

/// An n-hop, flash-loan-eligible opportunity with a closed cycle path.
pub fn n_hop_opportunity(id: &str) -> Value {
    let token_a = "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2";
    let token_b = "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48";
    json!({
        "id": id,
        "type": "n-hop",
        "buyChain": "ethereum",
        "buyDex": "uniswap_v3",
        "sellDex": "sushiswap",
        "tokenIn": token_a,
        "tokenOut": token_b,
        "amountIn": "500000000000000000",
        "expectedProfitUsd": 42.0,
        "confidence": 0.8,
        "timestamp": now_ms(),
        "useFlashLoan": true,
        "path": [
            {"router": "0x1111111111111111111111111111111111111111", "tokenOut": token_b},
            {"router": "0x2222222222222222222222222222222222222222", "tokenOut": token_a},
        ],
    })
}

/// A backrun opportunity targeting a victim swap observed in the mempool.
pub fn backrun_opportunity(id: &str) -> Value {
    json!({
        "id": id,
        "type": "backrun",
        "buyChain": "ethereum",
        "buyDex": "uniswap_v2",
        "sellDex": "uniswap_v2",
        "tokenIn": "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2",
        "tokenOut": "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48",
        "amountIn": "200000000000000000",
        "expectedProfitUsd": 30.0,
        "confidence": 0.85,
        "timestamp": now_ms(),
        "backrunTarget": {
            "txHash": "0xaaaabbbbccccddddeeeeffff00001111222233334444555566667777888899990000",
            "routerAddress": "0x7a250d5630B4cF539739dF2C5dAcb4c659F2488D",
            "direction": "buy",
            "source": "mempool",
            "traceId": "trace-1",
        },
    })
}

/// Invalid payload fixtures keyed by the validation failure they should
/// trigger in the admission pipeline.
pub fn invalid_opportunity(tag: &str) -> Value {
    match tag {
        "MISSING_ID" => json!({
            "type": "intra-chain",
            "buyChain": "ethereum",
            "tokenIn": "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2",
            "tokenOut": "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48",
            "amountIn": "1",
            "expectedProfitUsd": 1.0,
            "confidence": 0.9,
            "timestamp": now_ms(),
        }),
        "MISSING_TYPE" => {
            let mut v = intra_chain_opportunity("missing-type");
            v.as_object_mut().unwrap().remove("type");
            v
        }
        "ZERO_AMOUNT" => {
            let mut v = intra_chain_opportunity("zero-amount");
            v["amountIn"] = json!("0");
            v
        }
        "EXPIRED" => {
            let mut v = intra_chain_opportunity("expired");
            v["timestamp"] = json!(now_ms() - 10 * 60 * 1000);
            v
        }
        "LOW_CONFIDENCE" => {
            let mut v = intra_chain_opportunity("low-confidence");
            v["confidence"] = json!(0.01);
            v
        }
        "CROSS_CHAIN_SAME" => {
            let mut v = cross_chain_opportunity_high_fee("same-chain");
            v["sellChain"] = json!("ethereum");
            v
        }
        other => panic!("unknown invalid opportunity fixture tag: {other}"),
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intra_chain_fixture_has_no_sell_chain() {
        let v = intra_chain_opportunity("o1");
        assert!(v.get("sellChain").is_none());
    }

    #[test]
    fn cross_chain_fixture_has_distinct_chains() {
        let v = cross_chain_opportunity_high_fee("o2");
        assert_ne!(v["buyChain"], v["sellChain"]);
    }
}
