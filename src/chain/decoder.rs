//! Decodes CTF Exchange `OrderFilled` logs into trade rows.
//!
//! Layout: topic1 = maker, topic2 = taker; data = six 32-byte words
//! (order hash, maker asset id, taker asset id, maker amount filled,
//! taker amount filled, fee). Asset id 0 is the collateral (USDC);
//! the non-zero side is the outcome token.

use alloy::primitives::{keccak256, Address, B256, U256};
use rust_decimal::Decimal;

use crate::chain::client::RawLog;
use crate::error::{AppError, Result};
use crate::types::{Side, Trade};

pub const ORDER_FILLED_SIGNATURE: &str =
    "OrderFilled(bytes32,address,address,uint256,uint256,uint256,uint256,uint256)";

/// topic0 of the fill event.
pub fn order_filled_topic() -> B256 {
    keccak256(ORDER_FILLED_SIGNATURE.as_bytes())
}

pub fn decode_order_filled(log: &RawLog) -> Result<Trade> {
    if log.topics.len() < 3 {
        return Err(AppError::Decode(format!(
            "log {}:{}: OrderFilled requires 3 topics, got {}",
            log.tx_hash,
            log.log_index,
            log.topics.len()
        )));
    }
    if log.data.is_empty() || log.data.len() % 32 != 0 {
        return Err(AppError::Decode(format!(
            "log {}:{}: unexpected data length {}",
            log.tx_hash,
            log.log_index,
            log.data.len()
        )));
    }

    let words: Vec<U256> = log.data.chunks_exact(32).map(U256::from_be_slice).collect();
    if words.len() < 6 {
        return Err(AppError::Decode(format!(
            "log {}:{}: data payload too short ({} words)",
            log.tx_hash,
            log.log_index,
            words.len()
        )));
    }

    let maker_asset_id = words[1];
    let taker_asset_id = words[2];
    let maker_amount = to_u128(words[3], log)?;
    let taker_amount = to_u128(words[4], log)?;
    let fee = to_u128(words[5], log)?;

    let side = if maker_asset_id.is_zero() && !taker_asset_id.is_zero() {
        Side::Buy
    } else {
        Side::Sell
    };
    let (token_id, token_amount, usdc_amount) = match side {
        Side::Buy => (taker_asset_id, taker_amount, maker_amount),
        Side::Sell => (maker_asset_id, maker_amount, taker_amount),
    };

    let usdc_scale = Decimal::from(1_000_000u32);
    let (price, size) = if token_amount == 0 {
        (Decimal::ZERO, Decimal::ZERO)
    } else {
        let token_dec = to_decimal(token_amount, log)?;
        let usdc_dec = to_decimal(usdc_amount, log)?;
        ((usdc_dec / token_dec).normalize(), (token_dec / usdc_scale).normalize())
    };

    Ok(Trade {
        tx_hash: log.tx_hash.clone(),
        log_index: log.log_index,
        block_number: log.block_number,
        timestamp: None,
        token_id: token_id.to_string(),
        maker: topic_address(&log.topics[1]),
        taker: topic_address(&log.topics[2]),
        side,
        price,
        size,
        fee: to_decimal(fee, log)? / usdc_scale,
        exchange: log.address.clone(),
    })
}

/// Addresses are right-aligned in their topic word.
fn topic_address(topic: &B256) -> String {
    format!("{:#x}", Address::from_slice(&topic.as_slice()[12..]))
}

fn to_u128(word: U256, log: &RawLog) -> Result<u128> {
    u128::try_from(word).map_err(|_| {
        AppError::Decode(format!(
            "log {}:{}: amount exceeds u128",
            log.tx_hash, log.log_index
        ))
    })
}

fn to_decimal(amount: u128, log: &RawLog) -> Result<Decimal> {
    let signed = i128::try_from(amount).map_err(|_| {
        AppError::Decode(format!(
            "log {}:{}: amount exceeds decimal range",
            log.tx_hash, log.log_index
        ))
    })?;
    Decimal::try_from_i128_with_scale(signed, 0).map_err(|_| {
        AppError::Decode(format!(
            "log {}:{}: amount exceeds decimal range",
            log.tx_hash, log.log_index
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const MAKER: &str = "0x1111111111111111111111111111111111111111";
    const TAKER: &str = "0x2222222222222222222222222222222222222222";

    fn addr_topic(addr: &str) -> B256 {
        let a: Address = addr.parse().unwrap();
        B256::left_padding_from(a.as_slice())
    }

    fn fill_log(
        maker_asset: u128,
        taker_asset: u128,
        maker_amount: u128,
        taker_amount: u128,
        fee: u128,
    ) -> RawLog {
        let mut data = Vec::with_capacity(6 * 32);
        for word in [
            U256::from(7u64), // order hash word, opaque to the decoder
            U256::from(maker_asset),
            U256::from(taker_asset),
            U256::from(maker_amount),
            U256::from(taker_amount),
            U256::from(fee),
        ] {
            data.extend_from_slice(&word.to_be_bytes::<32>());
        }
        RawLog {
            address: "0x4bfb41d5b3570defd03c39a9a4d8de6bd8b8982e".to_string(),
            topics: vec![order_filled_topic(), addr_topic(MAKER), addr_topic(TAKER)],
            data,
            tx_hash: "0xabc".to_string(),
            log_index: 3,
            block_number: 100,
        }
    }

    #[test]
    fn decodes_buy_fill() {
        // Maker pays 550_000 USDC-wei for 1_000_000 token-wei.
        let trade = decode_order_filled(&fill_log(0, 42, 550_000, 1_000_000, 0)).unwrap();
        assert_eq!(trade.side, Side::Buy);
        assert_eq!(trade.token_id, "42");
        assert_eq!(trade.price, dec!(0.55));
        assert_eq!(trade.size, dec!(1));
        assert_eq!(trade.maker, MAKER);
        assert_eq!(trade.taker, TAKER);
        assert_eq!(trade.block_number, 100);
        assert_eq!(trade.log_index, 3);
    }

    #[test]
    fn decodes_sell_fill() {
        // Maker sells 2_000_000 token-wei for 900_000 USDC-wei.
        let trade = decode_order_filled(&fill_log(42, 0, 2_000_000, 900_000, 100)).unwrap();
        assert_eq!(trade.side, Side::Sell);
        assert_eq!(trade.token_id, "42");
        assert_eq!(trade.price, dec!(0.45));
        assert_eq!(trade.size, dec!(2));
        assert_eq!(trade.fee, dec!(0.0001));
    }

    #[test]
    fn zero_token_amount_yields_zero_price_and_size() {
        let trade = decode_order_filled(&fill_log(0, 42, 550_000, 0, 0)).unwrap();
        assert_eq!(trade.price, Decimal::ZERO);
        assert_eq!(trade.size, Decimal::ZERO);
    }

    #[test]
    fn short_topics_fail_to_decode() {
        let mut log = fill_log(0, 42, 1, 1, 0);
        log.topics.truncate(2);
        assert!(matches!(
            decode_order_filled(&log),
            Err(AppError::Decode(_))
        ));
    }

    #[test]
    fn truncated_data_fails_to_decode() {
        let mut log = fill_log(0, 42, 1, 1, 0);
        log.data.truncate(5 * 32);
        assert!(matches!(
            decode_order_filled(&log),
            Err(AppError::Decode(_))
        ));
    }

    #[test]
    fn ragged_data_fails_to_decode() {
        let mut log = fill_log(0, 42, 1, 1, 0);
        log.data.truncate(6 * 32 - 1);
        assert!(matches!(
            decode_order_filled(&log),
            Err(AppError::Decode(_))
        ));
    }
}
