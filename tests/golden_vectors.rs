//! Golden test vector validation
//!
//! The vectors pin the on-disk layout: header bytes for a given salt, file
//! key and passphrase, and the sealed bytes of individual sectors.

use std::io::Cursor;

use encfile::cipher::TAG_SIZE;
use encfile::keys::{HEADER_SIZE, KeyMaterial, RAW_KEY_SIZE, SALT_SIZE};
use encfile::{EncryptedFile, NonceScheme, Options, ScryptCost};
use serde::Deserialize;
use zeroize::Zeroizing;

#[derive(Debug, Deserialize)]
struct GoldenSector {
    index: u64,
    plaintext: String,
    ciphertext: String,
}

#[derive(Debug, Deserialize)]
struct GoldenVector {
    comment: String,
    passphrase: String,
    salt: String,
    real_key: String,
    log_n: u8,
    r: u32,
    p: u32,
    sector_size: usize,
    nonce_scheme: String,
    header: String,
    sectors: Vec<GoldenSector>,
}

impl GoldenVector {
    fn options(&self) -> Options {
        let nonce_scheme = match self.nonce_scheme.as_str() {
            "fixed" => NonceScheme::Fixed,
            "per_sector" => NonceScheme::PerSector,
            other => panic!("unknown nonce scheme {}", other),
        };
        Options::default()
            .with_sector_size(self.sector_size)
            .with_nonce_scheme(nonce_scheme)
            .with_cost(ScryptCost {
                log_n: self.log_n,
                r: self.r,
                p: self.p,
            })
    }
}

fn load_golden_vectors() -> Vec<GoldenVector> {
    let json_data = include_str!("../testdata/golden-vectors.json");
    serde_json::from_str(json_data).expect("failed to parse golden vectors")
}

#[test]
fn test_golden_headers() {
    let vectors = load_golden_vectors();
    assert!(!vectors.is_empty(), "No golden vectors were tested");

    for vector in &vectors {
        let passphrase = hex::decode(&vector.passphrase).unwrap();
        let salt: [u8; SALT_SIZE] = hex::decode(&vector.salt).unwrap().try_into().unwrap();
        let real_key: [u8; RAW_KEY_SIZE] =
            hex::decode(&vector.real_key).unwrap().try_into().unwrap();
        let options = vector.options();

        let material =
            KeyMaterial::from_parts(salt, Zeroizing::new(real_key), &passphrase, &options.cost)
                .unwrap();
        assert_eq!(
            hex::encode(material.header().encode()),
            vector.header,
            "header mismatch: {}",
            vector.comment
        );
    }
}

#[test]
fn test_golden_sectors() {
    for vector in load_golden_vectors() {
        let passphrase = hex::decode(&vector.passphrase).unwrap();
        let header = hex::decode(&vector.header).unwrap();
        let options = vector.options();
        let span = vector.sector_size + TAG_SIZE;

        // Sealing is deterministic for a given key and nonce, so writing the
        // plaintext must reproduce the recorded bytes exactly.
        let mut file = EncryptedFile::open_in(Cursor::new(header), &passphrase, &options)
            .unwrap_or_else(|e| panic!("unlock failed for {}: {}", vector.comment, e));
        for sector in &vector.sectors {
            let plaintext = hex::decode(&sector.plaintext).unwrap();
            file.write_sector(sector.index, &plaintext).unwrap();
        }
        let store = file.into_storage().unwrap().into_inner();

        for sector in &vector.sectors {
            let at = HEADER_SIZE + sector.index as usize * span;
            assert_eq!(
                hex::encode(&store[at..at + span]),
                sector.ciphertext,
                "sector {} mismatch: {}",
                sector.index,
                vector.comment
            );
        }

        let mut file = EncryptedFile::open_in(Cursor::new(store), &passphrase, &options).unwrap();
        for sector in &vector.sectors {
            assert_eq!(
                hex::encode(file.read_sector(sector.index).unwrap()),
                sector.plaintext,
                "decrypt mismatch: {}",
                vector.comment
            );
        }
    }
}

#[test]
fn test_golden_wrong_passphrase() {
    let vectors = load_golden_vectors();
    let vector = &vectors[0];
    let header = hex::decode(&vector.header).unwrap();

    let err = EncryptedFile::open_in(
        Cursor::new(header),
        b"A great little err whatever",
        &vector.options(),
    )
    .err()
    .expect("wrong passphrase must not unlock");
    assert_eq!(err.kind, Some(encfile::ErrorKind::AuthenticationFailed));
}
