use std::io::Write;
use std::num::{NonZeroU32, NonZeroU8};

use byte_slice_cast::AsSliceOf;
use keymix_sound::{SampleKind, Sound, SoundInfo};
use vorbis_rs::{VorbisBitrateManagementStrategy, VorbisEncoderBuilder};

use crate::CodecError;

const BLOCK_FRAMES: usize = 1024;

/// VBR Ogg Vorbis. The [0, 1] quality knob is shifted onto the libvorbis
/// quality scale so the renderer default of 0.6 lands on quality level 4.
pub fn encode<W: Write>(
    sound: &Sound,
    out: W,
    metadata: &crate::Metadata,
    quality: f64,
) -> Result<(), CodecError> {
    let info = *sound.info();
    let float_info = SoundInfo::new(SampleKind::Float, 32, info.channels, info.rate)?;
    let float = sound.resampled(float_info)?;
    let samples = float
        .as_bytes()
        .as_slice_of::<f32>()
        .expect("pcm storage alignment");
    let channels = info.channels as usize;

    let target_quality = (quality as f32 - 0.2).clamp(-0.2, 1.0);

    let mut builder = VorbisEncoderBuilder::new(
        NonZeroU32::new(info.rate).unwrap(),
        NonZeroU8::new(info.channels).unwrap(),
        out,
    )?;
    builder.bitrate_management_strategy(VorbisBitrateManagementStrategy::QualityVbr {
        target_quality,
    });
    for (key, value) in metadata {
        builder.comment_tag(key, value);
    }
    let mut encoder = builder.build()?;

    for chunk in samples.chunks(BLOCK_FRAMES * channels) {
        let frames = chunk.len() / channels;
        let mut planar: Vec<Vec<f32>> = vec![Vec::with_capacity(frames); channels];
        for frame in chunk.chunks_exact(channels) {
            for (ch, v) in frame.iter().enumerate() {
                planar[ch].push(*v);
            }
        }
        encoder.encode_audio_block(planar)?;
    }
    encoder.finish()?;
    Ok(())
}
