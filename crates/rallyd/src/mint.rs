//! Identifier mint: session codes, participant ids, resume tokens.

use rally_common::types::CODE_ALPHABET;
use rand::rngs::OsRng;
use rand::Rng;

/// Random base length of a participant id.
const PARTICIPANT_ID_LEN: usize = 3;
/// Suffix length appended to client participant ids.
const CLIENT_SUFFIX_LEN: usize = 2;
/// Resume tokens are this many random bytes, hex-encoded to twice as many
/// characters.
const RESUME_TOKEN_BYTES: usize = 24;

fn draw(len: usize) -> String {
    let mut rng = OsRng;
    (0..len)
        .map(|_| {
            let idx = rng.gen_range(0..CODE_ALPHABET.len());
            CODE_ALPHABET[idx] as char
        })
        .collect()
}

/// Mint a session code of the given length.
///
/// Collisions with live sessions are handled by the registry, which retries.
#[must_use]
pub fn session_code(length: usize) -> String {
    draw(length)
}

/// Mint a host participant id.
#[must_use]
pub fn host_participant_id() -> String {
    draw(PARTICIPANT_ID_LEN)
}

/// Mint a client participant id: a short base plus a client suffix.
#[must_use]
pub fn client_participant_id() -> String {
    format!("{}-{}", draw(PARTICIPANT_ID_LEN), draw(CLIENT_SUFFIX_LEN))
}

/// Mint an opaque resume token from a cryptographically strong source.
#[must_use]
pub fn resume_token() -> String {
    let mut bytes = [0u8; RESUME_TOKEN_BYTES];
    OsRng.fill(&mut bytes[..]);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
