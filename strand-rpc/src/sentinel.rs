//! Control sentinels carried in-band in command responses.
//!
//! The storage protocol signals routing events through the first response
//! element rather than a side channel. This module is the single place
//! those strings are written and interpreted; nothing outside it should
//! ever compare a response against a `!`-prefixed literal.
//!
//! Two layers of sentinel exist and are decoded separately:
//!
//! - control signals ([`Signal`], [`LockAck`]) that reroute or abort the
//!   operation, decoded here at the RPC boundary;
//! - data-level statuses ([`OK`], [`KEY_NOT_FOUND`], [`DUPLICATE_KEY`])
//!   that are ordinary results, mapped to typed values by the client.

use bytes::Bytes;
use strand_core::{limits, ReplicaChain};

use crate::error::{RpcError, RpcResult};

/// Response head marking data that now lives at another partition.
pub const EXPORTING: &str = "!exporting";

/// Response marking the caller's whole partition table as stale.
pub const BLOCK_MOVED: &str = "!block_moved";

/// Plain success acknowledgement.
pub const OK: &str = "!ok";

/// Lock acknowledgement naming a migration successor.
pub const REDIRECTING: &str = "!redirecting";

/// Trailing argument marking a command resent directly to a migration
/// target; the target admits it for slots it is importing.
pub const REDIRECTED: &str = "!redirected";

/// Data-level status: the key is not present.
pub const KEY_NOT_FOUND: &str = "!key_not_found";

/// Data-level status: the key is already present.
pub const DUPLICATE_KEY: &str = "!duplicate_key";

/// A control signal decoded from the head of a command response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// No control signal; the response is an ordinary result.
    Payload,
    /// The addressed slot is migrating; retry directly at this chain.
    Exporting(ReplicaChain),
    /// The table used to route this command no longer matches the
    /// cluster; refresh it and restart the whole operation.
    Moved,
}

/// A response to [`crate::CommandId::Lock`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockAck {
    /// The partition is locked and serving in place.
    Held,
    /// The partition is locked but part of its slot range is moving to
    /// the named successor, which must be locked as well.
    Redirecting(ReplicaChain),
}

/// Decodes the control signal, if any, at the head of a response.
///
/// Heads that are not valid UTF-8 or carry no recognized sentinel are
/// payload; values are opaque bytes and may collide with anything.
///
/// # Errors
///
/// Returns [`RpcError::MalformedResponse`] if a recognized sentinel
/// carries a malformed chain list.
pub fn decode_signal(head: &[u8]) -> RpcResult<Signal> {
    let Ok(text) = std::str::from_utf8(head) else {
        return Ok(Signal::Payload);
    };
    if text == BLOCK_MOVED {
        return Ok(Signal::Moved);
    }
    if let Some(rest) = text.strip_prefix(EXPORTING) {
        return Ok(Signal::Exporting(parse_chain(EXPORTING, rest)?));
    }
    Ok(Signal::Payload)
}

/// Decodes a lock acknowledgement.
///
/// # Errors
///
/// Returns [`RpcError::MalformedResponse`] for anything other than
/// [`OK`] or a well-formed [`REDIRECTING`] sentinel; a lock response is
/// never payload.
pub fn decode_lock_ack(head: &[u8]) -> RpcResult<LockAck> {
    let text = std::str::from_utf8(head).map_err(|_| RpcError::MalformedResponse {
        message: "lock acknowledgement is not UTF-8".to_string(),
    })?;
    if text == OK {
        return Ok(LockAck::Held);
    }
    if let Some(rest) = text.strip_prefix(REDIRECTING) {
        return Ok(LockAck::Redirecting(parse_chain(REDIRECTING, rest)?));
    }
    Err(RpcError::MalformedResponse {
        message: format!("unexpected lock acknowledgement: {text}"),
    })
}

/// Encodes an exporting signal naming the migration target.
#[must_use]
pub fn encode_exporting(target: &ReplicaChain) -> Bytes {
    Bytes::from(format!("{EXPORTING}!{}", target.identity()))
}

/// Encodes a redirecting lock acknowledgement naming the successor.
#[must_use]
pub fn encode_redirecting(target: &ReplicaChain) -> Bytes {
    Bytes::from(format!("{REDIRECTING}!{}", target.identity()))
}

/// Parses the `!`-joined block list following a chain-bearing sentinel.
fn parse_chain(sentinel: &str, rest: &str) -> RpcResult<ReplicaChain> {
    let Some(list) = rest.strip_prefix('!') else {
        return Err(RpcError::MalformedResponse {
            message: format!("{sentinel} sentinel carries no chain"),
        });
    };
    let blocks: Vec<String> = list.split('!').map(str::to_string).collect();
    if blocks.iter().any(String::is_empty) || blocks.len() > limits::CHAIN_LENGTH_MAX as usize {
        return Err(RpcError::MalformedResponse {
            message: format!("{sentinel} sentinel carries a malformed chain: {list}"),
        });
    }
    Ok(ReplicaChain::from_blocks(blocks))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_payload_is_not_a_signal() {
        assert_eq!(decode_signal(b"some value").unwrap(), Signal::Payload);
        assert_eq!(decode_signal(b"").unwrap(), Signal::Payload);
        // Values are opaque bytes; non-UTF-8 heads are payload too.
        assert_eq!(decode_signal(&[0xff, 0xfe, 0x01]).unwrap(), Signal::Payload);
    }

    #[test]
    fn test_data_statuses_are_payload() {
        assert_eq!(decode_signal(OK.as_bytes()).unwrap(), Signal::Payload);
        assert_eq!(decode_signal(KEY_NOT_FOUND.as_bytes()).unwrap(), Signal::Payload);
        assert_eq!(decode_signal(DUPLICATE_KEY.as_bytes()).unwrap(), Signal::Payload);
    }

    #[test]
    fn test_decode_block_moved() {
        assert_eq!(decode_signal(b"!block_moved").unwrap(), Signal::Moved);
    }

    #[test]
    fn test_decode_exporting_chain() {
        let signal = decode_signal(b"!exporting!host1:9090:3!host2:9090:3").unwrap();
        let Signal::Exporting(chain) = signal else {
            panic!("expected exporting signal, got {signal:?}");
        };
        assert_eq!(chain.blocks, vec!["host1:9090:3", "host2:9090:3"]);
    }

    #[test]
    fn test_exporting_round_trip() {
        let target = ReplicaChain::from_blocks(vec!["a".to_string(), "b".to_string()]);
        let encoded = encode_exporting(&target);
        let signal = decode_signal(&encoded).unwrap();
        assert_eq!(signal, Signal::Exporting(target));
    }

    #[test]
    fn test_exporting_without_chain_is_malformed() {
        assert!(decode_signal(b"!exporting").is_err());
        assert!(decode_signal(b"!exporting!").is_err());
        assert!(decode_signal(b"!exporting!a!!b").is_err());
    }

    #[test]
    fn test_decode_lock_ack_held() {
        assert_eq!(decode_lock_ack(b"!ok").unwrap(), LockAck::Held);
    }

    #[test]
    fn test_decode_lock_ack_redirecting() {
        let ack = decode_lock_ack(b"!redirecting!host3:9090:0").unwrap();
        let LockAck::Redirecting(chain) = ack else {
            panic!("expected redirecting ack, got {ack:?}");
        };
        assert_eq!(chain.identity(), "host3:9090:0");
    }

    #[test]
    fn test_unexpected_lock_ack_is_malformed() {
        assert!(decode_lock_ack(b"fine").is_err());
        assert!(decode_lock_ack(b"!redirecting").is_err());
    }
}
