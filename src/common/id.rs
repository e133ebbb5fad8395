//! Kademlia node Id or a lookup target
use rand::Rng;
use std::cmp::Ordering;
use std::fmt::{self, Debug, Display, Formatter};

use crate::{Error, Result};

/// The size of node IDs in bytes.
pub const ID_SIZE: usize = 20;
pub const MAX_DISTANCE: u8 = ID_SIZE as u8 * 8;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
/// Kademlia node Id or a lookup target
pub struct Id(pub [u8; ID_SIZE]);

impl Id {
    pub fn random() -> Id {
        let mut rng = rand::thread_rng();
        let random_bytes: [u8; ID_SIZE] = rng.gen();

        Id(random_bytes)
    }

    /// Create a new Id from some bytes. Returns Err if `bytes` is not of length
    /// [ID_SIZE].
    pub fn from_bytes<T: AsRef<[u8]>>(bytes: T) -> Result<Id> {
        let bytes = bytes.as_ref();
        if bytes.len() != ID_SIZE {
            return Err(Error::InvalidIdSize(bytes.len()));
        }

        let mut tmp: [u8; ID_SIZE] = [0; ID_SIZE];
        tmp.copy_from_slice(bytes);

        Ok(Id(tmp))
    }

    /// Lookup target for a hostname.
    ///
    /// SHA-1 of the lowercased hostname, XORed with the SHA-1 of the realm
    /// when one is configured, so that separate realms never collide.
    pub fn from_hostname(hostname: &str, realm: Option<&str>) -> Id {
        let host = Id(sha1(hostname.trim().to_lowercase().as_bytes()));

        match realm {
            Some(realm) => host.xor(&Id(sha1(realm.as_bytes()))),
            None => host,
        }
    }

    /// Compares `a` and `b` by their XOR distance to `target`.
    ///
    /// Returns [Ordering::Less] if `a` is closer to `target` than `b`.
    pub fn compare_distance(a: &Id, b: &Id, target: &Id) -> Ordering {
        for i in 0..ID_SIZE {
            if a.0[i] == b.0[i] {
                continue;
            }

            // First differing byte decides: big-endian comparison of the XORs.
            return (a.0[i] ^ target.0[i]).cmp(&(b.0[i] ^ target.0[i]));
        }

        Ordering::Equal
    }

    /// Simplified XOR distance between this Id and a target Id.
    ///
    /// Distance to self is 0
    /// Distance to the furthest Id is 160
    /// Distance to an Id with 5 leading matching bits is 155
    pub fn distance(&self, other: &Id) -> u8 {
        MAX_DISTANCE - self.common_prefix(other)
    }

    /// Number of leading bits shared with `other`.
    pub fn common_prefix(&self, other: &Id) -> u8 {
        for i in 0..ID_SIZE {
            let xor = self.0[i] ^ other.0[i];

            if xor != 0 {
                return (i as u32 * 8 + xor.leading_zeros()) as u8;
            }
        }

        MAX_DISTANCE
    }

    pub fn xor(&self, other: &Id) -> Id {
        let mut result = [0_u8; ID_SIZE];

        for (i, (a, b)) in self.0.iter().zip(other.0).enumerate() {
            result[i] = a ^ b;
        }

        Id(result)
    }

    pub fn as_bytes(&self) -> &[u8; ID_SIZE] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

fn sha1(bytes: &[u8]) -> [u8; ID_SIZE] {
    sha1_smol::Sha1::from(bytes).digest().bytes()
}

impl Display for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{:02x}", byte)?;
        }

        Ok(())
    }
}

impl Debug for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self)
    }
}

impl From<[u8; ID_SIZE]> for Id {
    fn from(bytes: [u8; ID_SIZE]) -> Self {
        Id(bytes)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn with_first_byte(byte: u8) -> Id {
        let mut bytes = [0x55; ID_SIZE];
        bytes[0] = byte;
        Id(bytes)
    }

    #[test]
    fn distance_to_self() {
        let id = Id::random();
        let distance = id.distance(&id);
        assert_eq!(distance, 0)
    }

    #[test]
    fn distance_to_furthest() {
        let id = Id::random();

        let mut opposite = [0_u8; 20];
        for (i, &value) in id.0.iter().enumerate() {
            opposite[i] = value ^ 0xff;
        }

        let distance = id.distance(&Id(opposite));

        assert_eq!(distance, MAX_DISTANCE)
    }

    #[test]
    fn closer_on_first_differing_byte() {
        let target = Id([0; ID_SIZE]);
        let a = with_first_byte(0x01);
        let b = with_first_byte(0x02);

        assert_eq!(Id::compare_distance(&a, &b, &target), Ordering::Less);
        assert_eq!(Id::compare_distance(&b, &a, &target), Ordering::Greater);
        assert_eq!(Id::compare_distance(&a, &a, &target), Ordering::Equal);
    }

    #[test]
    fn comparator_respects_target_bits() {
        // With the high bit set in the target, 0x80 is at distance 0x00
        // while 0x01 is at 0x81.
        let mut target = [0; ID_SIZE];
        target[0] = 0x80;
        let target = Id(target);

        let a = with_first_byte(0x80);
        let b = with_first_byte(0x01);

        assert_eq!(Id::compare_distance(&a, &b, &target), Ordering::Less);
    }

    #[test]
    fn comparator_is_antisymmetric() {
        for _ in 0..200 {
            let a = Id::random();
            let b = Id::random();
            let target = Id::random();

            let ab = Id::compare_distance(&a, &b, &target);
            let ba = Id::compare_distance(&b, &a, &target);

            assert_eq!(ab, ba.reverse());
            assert_eq!(ab, a.xor(&target).cmp(&b.xor(&target)));
        }
    }

    #[test]
    fn hostname_targets() {
        let plain = Id::from_hostname("Example.P2P", None);

        assert_eq!(plain, Id::from_hostname("example.p2p", None));
        assert_ne!(plain, Id::from_hostname("example.p2p", Some("office")));
        assert_eq!(
            Id::from_hostname("example.p2p", Some("office")),
            plain.xor(&Id(sha1(b"office")))
        );
    }

    #[test]
    fn from_bytes_rejects_wrong_size() {
        assert!(Id::from_bytes([0_u8; 19]).is_err());
        assert!(Id::from_bytes([0_u8; 21]).is_err());
        assert!(Id::from_bytes([7_u8; 20]).is_ok());
    }
}
