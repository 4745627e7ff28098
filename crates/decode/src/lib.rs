use std::fs::File;
use std::path::{Path, PathBuf};

use meloskia_transport::{AudioArc, AudioBuffer};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

const ASSETS_ROOT: &str = "assets";

/// Resolve an asset path against `base`, then against the `assets/` root.
/// Absolute paths and paths that exist as given are returned unchanged.
pub fn resolve_asset_path(path: &Path, base: Option<&Path>) -> Option<PathBuf> {
    if path.exists() {
        return Some(path.to_path_buf());
    }

    let candidates = base
        .into_iter()
        .flat_map(|base| [base.join(path), base.join(ASSETS_ROOT).join(path)])
        .chain(std::iter::once(Path::new(ASSETS_ROOT).join(path)));

    candidates.into_iter().find(|candidate| candidate.exists())
}

/// Decode an asset and bring it to the host sample rate.
pub fn load_asset(path: &Path, base: Option<&Path>, sample_rate: u32) -> anyhow::Result<AudioArc> {
    let resolved = resolve_asset_path(path, base)
        .ok_or_else(|| anyhow::anyhow!("asset not found: {}", path.display()))?;
    let buffer = decode_file(&resolved)?;
    tracing::debug!(
        path = %resolved.display(),
        frames = buffer.frames(),
        from = buffer.sample_rate,
        to = sample_rate,
        "decoded asset"
    );
    AudioArc::from_audio_buffer(buffer).resample(sample_rate)
}

pub fn decode_file(path: &Path) -> anyhow::Result<AudioBuffer> {
    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;

    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| anyhow::anyhow!("no default track in {}", path.display()))?;

    let sample_rate = track.codec_params.sample_rate.unwrap_or(44100);
    let channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(2) as u16;
    let track_id = track.id;

    let mut decoder =
        symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    let mut samples = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(symphonia::core::errors::Error::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => return Err(e.into()),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            // Corrupt packets are dropped; the rest of the stream is still usable.
            Err(symphonia::core::errors::Error::DecodeError(reason)) => {
                tracing::warn!(path = %path.display(), reason, "skipping undecodable packet");
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        let spec = *decoded.spec();
        let duration = decoded.capacity() as u64;

        let mut sample_buf = SampleBuffer::<f32>::new(duration, spec);
        sample_buf.copy_interleaved_ref(decoded);
        samples.extend_from_slice(sample_buf.samples());
    }

    Ok(AudioBuffer {
        samples,
        sample_rate,
        channels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_click(path: &Path, sample_rate: u32, frames: usize) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..frames {
            let value = if i < 10 { i16::MAX / 2 } else { 0 };
            writer.write_sample(value).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_decode_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("click.wav");
        write_click(&path, 44100, 4410);

        let buffer = decode_file(&path).unwrap();
        assert_eq!(buffer.sample_rate, 44100);
        assert_eq!(buffer.channels, 1);
        assert_eq!(buffer.frames(), 4410);
        assert!((buffer.peak() - 0.5).abs() < 0.01);
    }

    #[test]
    fn test_resolve_relative_to_base() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("assets")).unwrap();
        write_click(&dir.path().join("assets/metronome-01.wav"), 44100, 100);

        let resolved = resolve_asset_path(Path::new("metronome-01.wav"), Some(dir.path()));
        assert_eq!(resolved, Some(dir.path().join("assets/metronome-01.wav")));
        assert!(resolve_asset_path(Path::new("missing.wav"), Some(dir.path())).is_none());
    }

    #[test]
    fn test_load_asset_resamples() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("click.wav");
        write_click(&path, 22050, 2205);

        let audio = load_asset(&path, None, 44100).unwrap();
        assert_eq!(audio.sample_rate(), 44100);
        assert!((audio.duration_secs() - 0.1).abs() < 0.01);
    }

    #[test]
    fn test_missing_asset_is_an_error() {
        let err = load_asset(Path::new("/nonexistent/click.wav"), None, 44100).unwrap_err();
        assert!(err.to_string().contains("asset not found"));
    }
}
