//! Unit tests for the bounded terminal output ring.

use agent_conduit::terminal::OutputRing;

/// Chunks within the limit accumulate in order without truncation.
#[test]
fn within_limit_keeps_everything() {
    let mut ring = OutputRing::new(64);
    ring.push(b"hello ".to_vec());
    ring.push(b"world".to_vec());

    assert_eq!(ring.text(), "hello world");
    assert!(!ring.truncated());
    assert_eq!(ring.buffered_bytes(), 11);
}

/// Empty chunks are ignored entirely.
#[test]
fn empty_chunks_are_ignored() {
    let mut ring = OutputRing::new(8);
    ring.push(Vec::new());

    assert_eq!(ring.text(), "");
    assert_eq!(ring.buffered_bytes(), 0);
    assert!(!ring.truncated());
}

/// Past the limit, the oldest chunks are evicted first.
#[test]
fn eviction_drops_oldest_chunks_first() {
    let mut ring = OutputRing::new(10);
    ring.push(b"aaaa".to_vec());
    ring.push(b"bbbb".to_vec());
    ring.push(b"cccc".to_vec());

    assert_eq!(ring.text(), "bbbbcccc");
    assert!(ring.truncated());
    assert_eq!(ring.buffered_bytes(), 8);
}

/// The truncated flag stays set even after the buffer shrinks back under
/// the limit.
#[test]
fn truncated_flag_is_sticky() {
    let mut ring = OutputRing::new(4);
    ring.push(b"12345".to_vec());

    assert!(ring.truncated(), "over-limit push must set the flag");

    // The single over-limit chunk is retained, so the text survives.
    assert_eq!(ring.text(), "12345");
    assert!(ring.truncated(), "flag must not reset");
}

/// A single chunk larger than the limit is kept whole; eviction never
/// empties the ring completely.
#[test]
fn oversized_single_chunk_is_retained() {
    let mut ring = OutputRing::new(4);
    ring.push(b"0123456789".to_vec());

    assert_eq!(ring.text(), "0123456789");
    assert_eq!(ring.buffered_bytes(), 10);
    assert!(ring.truncated());

    // The next push evicts the oversized chunk.
    ring.push(b"ab".to_vec());
    assert_eq!(ring.text(), "ab");
    assert_eq!(ring.buffered_bytes(), 2);
    assert!(ring.truncated());
}

/// Invalid UTF-8 renders lossily instead of failing.
#[test]
fn invalid_utf8_renders_lossily() {
    let mut ring = OutputRing::new(16);
    ring.push(vec![b'o', b'k', 0xFF, b'!']);

    assert_eq!(ring.text(), "ok\u{FFFD}!");
}
