// src/parser.rs
use alloy::primitives::{Address, U256};

use crate::error::ContributionError;
use crate::models::{ParticipantAddress, TransferRecord};
use crate::rpc::{Log, TRANSFER_TOPIC};

fn topic_to_address(topic: &str) -> Option<ParticipantAddress> {
    // topics[1] and topics[2] are 32-byte (padded) hex strings; address is the last 20 bytes
    let s = topic.trim_start_matches("0x");
    let bytes = hex::decode(s).ok()?;
    if bytes.len() != 32 || bytes[..12].iter().any(|b| *b != 0) {
        return None;
    }
    let addr_bytes: [u8; 20] = bytes[12..32].try_into().ok()?;
    Some(Address::from(addr_bytes).into())
}

fn decode_amount(data: &str) -> Option<U256> {
    let s = data.trim_start_matches("0x");
    if s.is_empty() || s.len() > 64 {
        return None;
    }
    U256::from_str_radix(s, 16).ok()
}

/// Decode a single `Transfer` log. Any field that does not decode makes the
/// whole record malformed; callers abort rather than skip it.
pub fn decode_transfer(log: &Log) -> Result<TransferRecord, ContributionError> {
    let malformed = |what: &str| {
        ContributionError::MalformedRecord(format!("{} in log {}", what, log.tx_hash))
    };

    if log.topics.len() != 3 {
        return Err(malformed("unexpected topic count"));
    }
    if !log.topics[0].eq_ignore_ascii_case(TRANSFER_TOPIC) {
        return Err(malformed("not a Transfer event"));
    }

    let sender = topic_to_address(&log.topics[1]).ok_or_else(|| malformed("bad sender topic"))?;
    let recipient =
        topic_to_address(&log.topics[2]).ok_or_else(|| malformed("bad recipient topic"))?;
    let amount = decode_amount(&log.data).ok_or_else(|| malformed("non-numeric amount"))?;

    Ok(TransferRecord {
        sender,
        recipient,
        amount,
        tx_hash: log.tx_hash.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SENDER: &str = "0x1111111111111111111111111111111111111111";
    const RECIPIENT: &str = "0x2222222222222222222222222222222222222222";

    fn log_with(topics: Vec<String>, data: &str) -> Log {
        Log {
            address: "0x3333333333333333333333333333333333333333".to_string(),
            topics,
            data: data.to_string(),
            block_number_hex: "0x10".to_string(),
            tx_hash: "0xfeed".to_string(),
            removed: false,
        }
    }

    fn transfer_topics() -> Vec<String> {
        vec![
            TRANSFER_TOPIC.to_string(),
            ParticipantAddress::parse(SENDER).unwrap().as_topic(),
            ParticipantAddress::parse(RECIPIENT).unwrap().as_topic(),
        ]
    }

    #[test]
    fn decodes_well_formed_transfer() {
        // 2.5 * 10^18
        let log = log_with(
            transfer_topics(),
            "0x00000000000000000000000000000000000000000000000022b1c8c1227a0000",
        );
        let record = decode_transfer(&log).unwrap();
        assert_eq!(record.sender, ParticipantAddress::parse(SENDER).unwrap());
        assert_eq!(record.recipient, ParticipantAddress::parse(RECIPIENT).unwrap());
        assert_eq!(record.amount, U256::from(2_500_000_000_000_000_000u128));
    }

    #[test]
    fn non_numeric_amount_is_malformed() {
        let log = log_with(transfer_topics(), "0xnotanumber");
        assert!(matches!(
            decode_transfer(&log),
            Err(ContributionError::MalformedRecord(_))
        ));
    }

    #[test]
    fn empty_amount_is_malformed() {
        let log = log_with(transfer_topics(), "0x");
        assert!(matches!(
            decode_transfer(&log),
            Err(ContributionError::MalformedRecord(_))
        ));
    }

    #[test]
    fn missing_topics_are_malformed() {
        let log = log_with(vec![TRANSFER_TOPIC.to_string()], "0x01");
        assert!(matches!(
            decode_transfer(&log),
            Err(ContributionError::MalformedRecord(_))
        ));
    }

    #[test]
    fn dirty_topic_padding_is_malformed() {
        let mut topics = transfer_topics();
        topics[1] = format!("0xff{}", &topics[1][4..]);
        let log = log_with(topics, "0x01");
        assert!(matches!(
            decode_transfer(&log),
            Err(ContributionError::MalformedRecord(_))
        ));
    }
}
