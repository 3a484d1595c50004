//! ActivityPub translation
//!
//! Converts Chorus posts into ActivityStreams Notes. Publish timestamps are
//! a pure function of `(post_id, day_number)`: the stamp stays inside the
//! post's day window (no intra-day wall-clock leak) while remaining
//! identical across bridges and restarts.

use sha2::{Digest, Sha256};

use chorus_bridge_proto::PostAnnouncement;
use chorus_bridge_types::ActivityPubNote;

const SECONDS_PER_DAY: u64 = 86_400;

/// Translate Chorus posts into ActivityStreams objects
#[derive(Debug, Clone)]
pub struct ActivityPubTranslator {
    genesis_timestamp: i64,
    actor_domain: String,
}

impl ActivityPubTranslator {
    pub fn new(genesis_timestamp: i64, actor_domain: impl Into<String>) -> Self {
        Self {
            genesis_timestamp,
            actor_domain: actor_domain.into(),
        }
    }

    /// Pseudonymous actor URI: first 16 hex chars of SHA-256(author pubkey)
    pub fn actor_uri(&self, author_pubkey: &[u8]) -> String {
        let digest = hex::encode(Sha256::digest(author_pubkey));
        format!("https://{}/actors/{}", self.actor_domain, &digest[..16])
    }

    /// Deterministic publish timestamp within the post's day window
    ///
    /// The offset is drawn from SHA-256 of `"{post_id_hex}:{day_number}"`,
    /// uniform over `[0, 86400)` seconds past day start.
    pub fn derive_publish_timestamp(&self, day_number: u64, post_id: &[u8]) -> i64 {
        let seed = format!("{}:{}", hex::encode(post_id), day_number);
        let digest = Sha256::digest(seed.as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        let offset = u64::from_be_bytes(prefix) % SECONDS_PER_DAY;
        self.genesis_timestamp + (day_number * SECONDS_PER_DAY) as i64 + offset as i64
    }

    /// Build the Note and its publish timestamp for a post
    pub fn build_note(&self, post: &PostAnnouncement, body_md: &str) -> (ActivityPubNote, i64) {
        let published_ts = self.derive_publish_timestamp(post.creation_day, &post.post_id);
        let note = ActivityPubNote::new(
            self.actor_uri(&post.author_pubkey),
            body_md.to_string(),
            format_timestamp(published_ts),
        );
        (note, published_ts)
    }
}

fn format_timestamp(timestamp: i64) -> String {
    chrono::DateTime::from_timestamp(timestamp, 0)
        .unwrap_or(chrono::DateTime::UNIX_EPOCH)
        .to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn translator() -> ActivityPubTranslator {
        ActivityPubTranslator::new(1_729_670_400, "bridge.chorus.social")
    }

    fn post(creation_day: u64) -> PostAnnouncement {
        PostAnnouncement {
            post_id: vec![0xde, 0xad, 0xbe, 0xef],
            author_pubkey: vec![7u8; 32],
            content_hash: vec![1, 2, 3],
            order_index: 1,
            creation_day,
        }
    }

    #[test]
    fn test_publish_timestamp_is_pure() {
        let t = translator();
        let a = t.derive_publish_timestamp(2, &[0xde, 0xad, 0xbe, 0xef]);
        let b = t.derive_publish_timestamp(2, &[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_publish_timestamp_stays_in_day_window() {
        let t = translator();
        for day in [0u64, 1, 2, 100, 10_000] {
            let ts = t.derive_publish_timestamp(day, b"post");
            let day_start = 1_729_670_400 + (day * 86_400) as i64;
            assert!(ts >= day_start);
            assert!(ts < day_start + 86_400);
        }
    }

    #[test]
    fn test_publish_timestamp_varies_with_inputs() {
        let t = translator();
        assert_ne!(
            t.derive_publish_timestamp(2, b"post-a"),
            t.derive_publish_timestamp(2, b"post-b")
        );
        assert_ne!(
            t.derive_publish_timestamp(2, b"post-a"),
            t.derive_publish_timestamp(3, b"post-a")
        );
    }

    #[test]
    fn test_actor_uri_is_truncated_sha256() {
        let t = translator();
        let pubkey = vec![7u8; 32];
        let digest = hex::encode(Sha256::digest(&pubkey));
        assert_eq!(
            t.actor_uri(&pubkey),
            format!("https://bridge.chorus.social/actors/{}", &digest[..16])
        );
    }

    #[test]
    fn test_build_note_shape() {
        let t = translator();
        let (note, published_ts) = t.build_note(&post(2), "Hello Chorus");
        assert_eq!(note.content, "Hello Chorus");
        assert_eq!(note.note_type, "Note");
        assert!(note.attributed_to.starts_with("https://bridge.chorus.social/actors/"));
        assert_eq!(
            note.published,
            format_timestamp(published_ts)
        );
        assert_eq!(note.to, vec!["https://www.w3.org/ns/activitystreams#Public"]);
    }
}
