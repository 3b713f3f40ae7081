// Deterministic VF MAC derivation.
//
// Many SR-IOV drivers hand every VF a fresh random MAC on each reboot or
// module reload. Deriving the MAC from the PF's hardware MAC, the VF's
// slot index, and the PF's device name gives each (PF, index) pair a
// stable address across reboots without persisting a MAC table. The slow
// bcrypt stage keeps the PF's real hardware MAC from being trivially
// brute-forced back out of a VF address seen on the wire; the final
// sha256 truncation shapes the digest into a well-formed MAC.

use base64::Engine;
use base64::alphabet;
use base64::engine::general_purpose::URL_SAFE;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use sha2::{Digest, Sha256};

const BCRYPT_COST: u32 = 12;

// bcrypt's own base64 alphabet, used to decode the textual salt into the
// raw bytes the hash consumes.
const BCRYPT_B64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::BCRYPT,
    GeneralPurposeConfig::new()
        .with_decode_allow_trailing_bits(true)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Derive the stable MAC for a VF slot. Deterministic for identical
/// inputs; the result is always a locally-administered unicast address.
pub fn derive_mac(pf_mac: &str, vf_index: u32, pf_device_name: &str) -> String {
    let salt = salt_for_device(pf_device_name);
    let input = format!("${pf_mac}v{vf_index}");

    let hashed = bcrypt::hash_with_salt(input.as_bytes(), BCRYPT_COST, salt)
        .expect("cost 12 is within bcrypt's allowed range")
        .format_for_version(bcrypt::Version::TwoB);

    let digest = Sha256::digest(hashed.as_bytes());
    let mut mac = [0u8; 6];
    mac.copy_from_slice(&digest[..6]);

    // Force locally-administered, unicast.
    mac[0] = (mac[0] | 0b0000_0010) & 0b1111_1110;

    mac.iter()
        .map(|byte| format!("{byte:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Deterministic 16-byte bcrypt salt from the PF's device-name string:
/// sha256, base64url, first 23 characters with the url-safe delimiters
/// `-` and `_` mapped to `a` and `b` so the string is valid in the
/// bcrypt salt encoding, then decoded through bcrypt's alphabet.
fn salt_for_device(device_name: &str) -> [u8; 16] {
    let digest = Sha256::digest(device_name.as_bytes());
    let encoded: String = URL_SAFE
        .encode(digest)
        .chars()
        .take(23)
        .map(|c| match c {
            '-' => 'a',
            '_' => 'b',
            other => other,
        })
        .collect();

    // A bcrypt salt is 22 encoded characters for 16 bytes; the 23rd
    // character of the textual form carries no salt bits.
    let raw = BCRYPT_B64
        .decode(&encoded.as_bytes()[..22])
        .expect("sha256-derived salt characters are all in the bcrypt alphabet");
    raw.try_into()
        .expect("22 bcrypt-base64 characters decode to 16 bytes")
}
