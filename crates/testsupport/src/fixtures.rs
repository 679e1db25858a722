use grapefruit_krpc::Value;
use grapefruit_models::{Id20, InfoHash};
use sha1::{Digest, Sha1};
use tempfile::TempDir;

/// A bencoded info dictionary and the hash that identifies it.
#[derive(Debug, Clone)]
pub struct SampleTorrent {
    pub info_hash: InfoHash,
    pub info: Vec<u8>,
    pub name: String,
}

impl SampleTorrent {
    fn from_value(name: &str, info: Value) -> Self {
        let info = info.to_bytes();
        let digest = Sha1::digest(&info);
        let mut hash = [0u8; 20];
        hash.copy_from_slice(digest.as_slice());
        Self { info_hash: Id20::new(hash), info, name: name.to_string() }
    }
}

pub fn single_file_torrent(name: &str, length: u64) -> SampleTorrent {
    let info = Value::dict()
        .insert("name", Value::bytes(name))
        .insert("length", Value::Int(length as i64))
        .insert("piece length", Value::Int(262144))
        .insert("pieces", Value::bytes(vec![0xab; 20]))
        .build();
    SampleTorrent::from_value(name, info)
}

/// Multi-file torrent whose `pieces` string is `pieces_len` bytes long, so
/// large values make the metadata span several ut_metadata pieces.
pub fn multi_file_torrent(name: &str, files: &[(&str, u64)], pieces_len: usize) -> SampleTorrent {
    let files = files
        .iter()
        .map(|(path, length)| {
            Value::dict()
                .insert("length", Value::Int(*length as i64))
                .insert("path", Value::List(path.split('/').map(Value::bytes).collect()))
                .build()
        })
        .collect();
    let info = Value::dict()
        .insert("name", Value::bytes(name))
        .insert("files", Value::List(files))
        .insert("piece length", Value::Int(262144))
        .insert("pieces", Value::bytes(vec![0x5a; pieces_len]))
        .build();
    SampleTorrent::from_value(name, info)
}

/// SQLite URL inside a fresh temp dir. Keep the `TempDir` alive for the test.
pub fn temp_db_url() -> anyhow::Result<(TempDir, String)> {
    let dir = tempfile::tempdir()?;
    let url = format!("sqlite://{}/grapefruit.db", dir.path().display());
    Ok((dir, url))
}
