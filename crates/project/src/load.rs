use crate::save::is_message_pack;
use crate::{ProjectError, Score};
use std::fs;
use std::path::Path;

/// MessagePack by extension or content; JSON errors are reported as such.
fn load_score_data(path: &Path) -> Result<Score, ProjectError> {
    let bytes = fs::read(path)?;
    let json = !is_message_pack(path)
        && (path.extension().is_some_and(|ext| ext == "json")
            || bytes.iter().find(|b| !b.is_ascii_whitespace()) == Some(&b'{'));

    if json {
        Ok(serde_json::from_slice(&bytes)?)
    } else {
        Ok(rmp_serde::decode::from_slice(&bytes)?)
    }
}

/// Read and validate a song file.
pub fn load_score(path: &Path) -> Result<Score, ProjectError> {
    let score = load_score_data(path)?;
    score.validate()?;
    Ok(score)
}
