use model::{Error, ExtentInfo, Result};
use xxhash_rust::xxh3::Xxh3;

/// Which digests an extent carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashAlgs {
    pub md5: bool,
    pub xxh128: bool,
}

impl HashAlgs {
    pub fn none() -> Self {
        Self {
            md5: false,
            xxh128: false,
        }
    }
}

/// Streaming digests over one extent's bytes.
pub struct HasherSet {
    md5: Option<md5::Context>,
    xxh: Option<Xxh3>,
}

impl HasherSet {
    pub fn new(algs: HashAlgs) -> Self {
        Self {
            md5: algs.md5.then(md5::Context::new),
            xxh: algs.xxh128.then(Xxh3::new),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        if let Some(ctx) = self.md5.as_mut() {
            ctx.consume(data);
        }
        if let Some(xxh) = self.xxh.as_mut() {
            xxh.update(data);
        }
    }

    pub fn finish(self) -> Digests {
        Digests {
            md5: self.md5.map(|ctx| ctx.compute().0),
            xxh128: self.xxh.map(|xxh| xxh.digest128().to_be_bytes()),
        }
    }
}

/// Finalized digests of one split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Digests {
    pub md5: Option<[u8; 16]>,
    pub xxh128: Option<[u8; 16]>,
}

impl Digests {
    /// Record these digests on an extent. All replicas of a split carry
    /// identical bytes, so one finalized set serves every replica.
    pub fn store_into(&self, extent: &mut ExtentInfo) {
        extent.md5 = self.md5;
        extent.xxh128 = self.xxh128;
    }

    /// Compare against the digests stored on an extent. Algorithms present
    /// on only one side are skipped.
    pub fn verify(&self, extent: &ExtentInfo) -> Result<()> {
        if let (Some(computed), Some(stored)) = (self.md5, extent.md5) {
            if computed != stored {
                return Err(Error::Integrity(format!(
                    "md5 mismatch on extent {}: computed {}, stored {}",
                    extent.uuid,
                    hex::encode(computed),
                    hex::encode(stored),
                )));
            }
        }
        if let (Some(computed), Some(stored)) = (self.xxh128, extent.xxh128) {
            if computed != stored {
                return Err(Error::Integrity(format!(
                    "xxh128 mismatch on extent {}: computed {}, stored {}",
                    extent.uuid,
                    hex::encode(computed),
                    hex::encode(stored),
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use model::{Family, MediumId};

    fn extent() -> ExtentInfo {
        ExtentInfo::pending(MediumId::new(Family::Dir, "d1", "legacy"), 0, 0)
    }

    #[test]
    fn test_known_md5() {
        let mut hasher = HasherSet::new(HashAlgs {
            md5: true,
            xxh128: false,
        });
        hasher.update(b"abc");
        let digests = hasher.finish();
        assert_eq!(
            hex::encode(digests.md5.unwrap()),
            "900150983cd24fb0d6963f7d28e17f72"
        );
        assert!(digests.xxh128.is_none());
    }

    #[test]
    fn test_streaming_equals_oneshot() {
        let mut streamed = HasherSet::new(HashAlgs {
            md5: true,
            xxh128: true,
        });
        streamed.update(b"hello ");
        streamed.update(b"world");

        let mut oneshot = HasherSet::new(HashAlgs {
            md5: true,
            xxh128: true,
        });
        oneshot.update(b"hello world");

        assert_eq!(streamed.finish(), oneshot.finish());
    }

    #[test]
    fn test_verify_detects_mismatch() {
        let mut hasher = HasherSet::new(HashAlgs {
            md5: true,
            xxh128: true,
        });
        hasher.update(b"payload");
        let digests = hasher.finish();

        let mut ext = extent();
        digests.store_into(&mut ext);
        digests.verify(&ext).unwrap();

        // Flip one stored byte.
        let mut bad = ext.clone();
        bad.md5.as_mut().unwrap()[0] ^= 0xff;
        assert!(matches!(digests.verify(&bad), Err(Error::Integrity(_))));
    }

    #[test]
    fn test_verify_skips_absent_algorithms() {
        let mut hasher = HasherSet::new(HashAlgs {
            md5: false,
            xxh128: true,
        });
        hasher.update(b"payload");
        let digests = hasher.finish();

        // Extent only has an md5; nothing to compare.
        let mut ext = extent();
        ext.md5 = Some([0u8; 16]);
        digests.verify(&ext).unwrap();
    }
}
