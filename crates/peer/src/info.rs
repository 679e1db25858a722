//! Turning a verified info dictionary into the record the crawler stores.

use grapefruit_krpc::Value;
use grapefruit_models::{GrapefruitError, InfoHash, TorrentFile, TorrentMetadata};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentInfo {
    pub name: String,
    pub files: Vec<TorrentFile>,
}

impl TorrentInfo {
    /// Reads `name` and the file list from an info dictionary.
    ///
    /// UTF-8 variants (`name.utf-8`, `path.utf-8`) win when present. Byte
    /// strings that are not valid UTF-8 are decoded lossily. A single-file
    /// torrent yields one file whose path is the torrent name.
    pub fn from_info_dict(info: &Value) -> Result<Self, GrapefruitError> {
        if info.as_dict().is_none() {
            return Err(invalid("info is not a dictionary"));
        }

        let name = info
            .get_bytes("name.utf-8")
            .or_else(|| info.get_bytes("name"))
            .map(lossy)
            .ok_or_else(|| invalid("missing name"))?;

        let files = match info.get("files") {
            Some(list) => {
                let entries = list.as_list().ok_or_else(|| invalid("files is not a list"))?;
                entries.iter().map(parse_file).collect::<Result<Vec<_>, _>>()?
            }
            None => {
                let length = info.get_int("length").ok_or_else(|| invalid("missing length"))?;
                vec![TorrentFile { length: non_negative(length)?, path: vec![name.clone()] }]
            }
        };

        Ok(Self { name, files })
    }

    pub fn into_metadata(self, info_hash: &InfoHash) -> TorrentMetadata {
        TorrentMetadata::new(info_hash, self.name, self.files)
    }
}

fn parse_file(entry: &Value) -> Result<TorrentFile, GrapefruitError> {
    let length = entry.get_int("length").ok_or_else(|| invalid("file entry without length"))?;
    let path = entry
        .get("path.utf-8")
        .or_else(|| entry.get("path"))
        .and_then(Value::as_list)
        .ok_or_else(|| invalid("file entry without path"))?
        .iter()
        .map(|segment| segment.as_bytes().map(lossy).ok_or_else(|| invalid("path segment is not a string")))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(TorrentFile { length: non_negative(length)?, path })
}

fn non_negative(length: i64) -> Result<u64, GrapefruitError> {
    u64::try_from(length).map_err(|_| invalid("negative length"))
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn invalid(reason: &str) -> GrapefruitError {
    GrapefruitError::MetadataInvalid { reason: reason.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grapefruit_krpc::decode;
    use grapefruit_models::Id20;

    #[test]
    fn test_single_file_torrent() {
        let info = decode(b"d6:lengthi1024e4:name8:demo.iso12:piece lengthi16384ee").unwrap();
        let parsed = TorrentInfo::from_info_dict(&info).unwrap();
        assert_eq!(parsed.name, "demo.iso");
        assert_eq!(parsed.files, vec![TorrentFile { length: 1024, path: vec!["demo.iso".to_string()] }]);
    }

    #[test]
    fn test_multi_file_prefers_utf8_keys() {
        let info = Value::dict()
            .insert("name", Value::bytes(&b"old\xffname"[..]))
            .insert("name.utf-8", Value::bytes("album"))
            .insert(
                "files",
                Value::List(vec![
                    Value::dict()
                        .insert("length", Value::Int(10))
                        .insert("path", Value::List(vec![Value::bytes("cd1"), Value::bytes("a.flac")]))
                        .build(),
                    Value::dict()
                        .insert("length", Value::Int(20))
                        .insert("path", Value::List(vec![Value::bytes("x")]))
                        .insert("path.utf-8", Value::List(vec![Value::bytes("b.flac")]))
                        .build(),
                ]),
            )
            .build();

        let parsed = TorrentInfo::from_info_dict(&info).unwrap();
        assert_eq!(parsed.name, "album");
        assert_eq!(parsed.files[0].path, vec!["cd1", "a.flac"]);
        assert_eq!(parsed.files[1].path, vec!["b.flac"]);

        let metadata = parsed.into_metadata(&Id20::new([7; 20]));
        assert_eq!(metadata.total_length(), 30);
        assert_eq!(metadata.info_hash, "07".repeat(20));
    }

    #[test]
    fn test_invalid_utf8_is_decoded_lossily() {
        let info = Value::dict()
            .insert("name", Value::bytes(&b"bad\xff"[..]))
            .insert("length", Value::Int(1))
            .build();
        let parsed = TorrentInfo::from_info_dict(&info).unwrap();
        assert_eq!(parsed.name, "bad\u{fffd}");
    }

    #[test]
    fn test_rejects_incomplete_info() {
        assert!(TorrentInfo::from_info_dict(&decode(b"d6:lengthi1ee").unwrap()).is_err());
        assert!(TorrentInfo::from_info_dict(&decode(b"d4:name1:xe").unwrap()).is_err());
        assert!(TorrentInfo::from_info_dict(&decode(b"d6:lengthi-1e4:name1:xe").unwrap()).is_err());
        assert!(TorrentInfo::from_info_dict(&decode(b"li1ee").unwrap()).is_err());
    }
}
