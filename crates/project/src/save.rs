use crate::{ProjectError, Score};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

pub(crate) fn is_message_pack(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| matches!(ext, "msgpack" | "mpk"))
}

/// Write a song file: MessagePack for `.msgpack`/`.mpk`, pretty JSON otherwise.
pub fn save_score(path: &Path, score: &Score) -> Result<(), ProjectError> {
    score.validate()?;

    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    if is_message_pack(path) {
        rmp_serde::encode::write_named(&mut writer, score)?;
    } else {
        serde_json::to_writer_pretty(&mut writer, score)?;
    }
    writer.flush()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_score;
    use tempfile::tempdir;

    #[test]
    fn test_save_score_creates_json() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("song.json");
        let song = crate::songs::the_final_tech_stack();

        save_score(&path, &song).expect("save");

        let file = std::fs::File::open(&path).expect("open");
        let reader = std::io::BufReader::new(file);
        let value: serde_json::Value = serde_json::from_reader(reader).expect("decode");
        assert_eq!(value["baseBpm"], 120.0);
        assert_eq!(value["voices"][0]["notes"][0]["type"], "i");
        assert_eq!(value["voices"][0]["notes"][0]["noteName"], "C#4");
    }

    #[test]
    fn test_save_score_msgpack_roundtrip() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("song.msgpack");
        let song = crate::songs::all_notes_demo_reversed();

        save_score(&path, &song).expect("save");
        assert!(serde_json::from_slice::<Score>(&std::fs::read(&path).unwrap()).is_err());

        let loaded = load_score(&path).expect("load");
        assert_eq!(loaded, song);
    }

    #[test]
    fn test_save_rejects_invalid_score() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("bad.json");
        let mut song = crate::songs::ez_song();
        song.base_tempo = 0.0;

        let result = save_score(&path, &song);
        assert!(matches!(result.unwrap_err(), ProjectError::Invalid(_)));
        assert!(!path.exists());
    }
}
