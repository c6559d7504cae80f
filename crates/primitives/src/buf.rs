use std::fmt;
use std::str;

use arbitrary::Arbitrary;
use borsh::{BorshDeserialize, BorshSerialize};

/// 32-byte buf, useful for hashes and identity pubkeys.
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Buf32(pub [u8; 32]);

impl Buf32 {
    pub fn zero() -> Self {
        Self([0; 32])
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 32]> for Buf32 {
    fn from(value: [u8; 32]) -> Self {
        Self(value)
    }
}

impl From<Buf32> for [u8; 32] {
    fn from(value: Buf32) -> Self {
        value.0
    }
}

impl fmt::Debug for Buf32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut buf = [0; 64];
        hex::encode_to_slice(self.0, &mut buf).expect("buf: enc hex");
        f.write_str(unsafe { str::from_utf8_unchecked(&buf) })
    }
}

impl fmt::Display for Buf32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Display the first and last parts so it doesn't dominate log lines.
        let mut buf = [0; 64];
        hex::encode_to_slice(self.0, &mut buf).expect("buf: enc hex");
        let s = unsafe { str::from_utf8_unchecked(&buf) };
        write!(f, "{}..{}", &s[..8], &s[56..])
    }
}

impl BorshSerialize for Buf32 {
    fn serialize<W: std::io::prelude::Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(&self.0)?;
        Ok(())
    }
}

impl BorshDeserialize for Buf32 {
    fn deserialize_reader<R: std::io::prelude::Read>(reader: &mut R) -> std::io::Result<Self> {
        let mut array = [0u8; 32];
        reader.read_exact(&mut array)?;
        Ok(Self(array))
    }
}

impl<'a> Arbitrary<'a> for Buf32 {
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        let mut array = [0u8; 32];
        u.fill_buffer(&mut array)?;
        Ok(Buf32(array))
    }
}

#[cfg(test)]
mod tests {
    use meridian_test_utils::ArbitraryGenerator;

    use super::Buf32;

    #[test]
    fn test_borsh_codec() {
        // The borsh impls are written by hand, so check they stay fixed-width
        // and symmetric.
        let b: Buf32 = ArbitraryGenerator::new().generate();
        let enc = borsh::to_vec(&b).expect("test: serialize");
        assert_eq!(enc.len(), 32);
        let dec: Buf32 = borsh::from_slice(&enc).expect("test: deserialize");
        assert_eq!(b, dec);
    }

    #[test]
    fn test_zero_is_zero() {
        assert!(Buf32::zero().is_zero());
        assert!(!Buf32::from([1; 32]).is_zero());
    }

    #[test]
    fn test_debug_hex() {
        let b = Buf32::from([0xab; 32]);
        assert_eq!(format!("{b:?}"), "ab".repeat(32));
    }
}
