use crate::error::GeneratorError;
use crate::Generator;
use rand::rngs::OsRng;
use rand::TryRngCore;
use snip_core::ShortCode;

const CODE_BYTES: usize = 4;

/// Generates 8-character lowercase hex codes from the OS random source.
///
/// Four random bytes give 2^32 possible codes.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomHexGenerator;

impl RandomHexGenerator {
    pub fn new() -> Self {
        Self
    }
}

impl Generator for RandomHexGenerator {
    fn generate(&self) -> Result<ShortCode, GeneratorError> {
        let mut bytes = [0u8; CODE_BYTES];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| GeneratorError::Entropy(e.to_string()))?;
        Ok(ShortCode::new_unchecked(hex::encode(bytes)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn produces_eight_lowercase_hex_chars() {
        let generator = RandomHexGenerator::new();

        for _ in 0..100 {
            let code = generator.generate().unwrap();
            assert_eq!(code.as_str().len(), 8);
            assert!(code
                .as_str()
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
        }
    }

    #[test]
    fn codes_are_spread_out() {
        let generator = RandomHexGenerator::new();
        let codes: HashSet<_> = (0..1_000)
            .map(|_| generator.generate().unwrap())
            .collect();
        // 1000 draws from 2^32 values; a handful of collisions would already be suspicious
        assert!(codes.len() >= 998);
    }

    #[test]
    fn generator_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RandomHexGenerator>();
    }
}
