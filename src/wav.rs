// WAV 파일 입출력
// 쓰기: 44바이트 표준 헤더 + 16-bit PCM / 읽기: fmt 청크 파라미터만 (디코더 워크어라운드용)

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use ffmpeg_next as ffmpeg;
use ffmpeg::format::sample::Type as SampleType;
use ffmpeg::format::Sample;

use crate::audio::params::AudioParams;

const HEADER_SIZE: u32 = 44;

/// 44바이트 WAV 헤더 기록
/// data 청크 길이 = 전체 파일 길이 - 44
fn write_header<W: Write>(
    writer: &mut W,
    file_length: u32,
    channels: u16,
    sample_rate: u32,
) -> io::Result<()> {
    let bits_per_sample: u16 = 16;
    let block_align = bits_per_sample * channels / 8;
    let bytes_per_second = sample_rate * block_align as u32;

    writer.write_all(b"RIFF")?;
    writer.write_all(&(file_length - 8).to_le_bytes())?;
    writer.write_all(b"WAVE")?;
    writer.write_all(b"fmt ")?;
    writer.write_all(&16u32.to_le_bytes())?; // fmt 청크 크기
    writer.write_all(&1u16.to_le_bytes())?; // compression code 1 = linear PCM
    writer.write_all(&channels.to_le_bytes())?;
    writer.write_all(&sample_rate.to_le_bytes())?;
    writer.write_all(&bytes_per_second.to_le_bytes())?;
    writer.write_all(&block_align.to_le_bytes())?;
    writer.write_all(&bits_per_sample.to_le_bytes())?;
    writer.write_all(b"data")?;
    writer.write_all(&(file_length - HEADER_SIZE).to_le_bytes())?;
    Ok(())
}

/// 좌/우 채널 분리 시퀀스를 스테레오 WAV로 기록
/// 샘플은 호스트 바이트 순서 그대로 기록 (빅엔디언 호스트는 로더의
/// force_little_endian으로 미리 맞춰 둔다)
pub fn write_wav_split(
    path: &Path,
    left: &[i16],
    right: &[i16],
    sample_rate: u32,
) -> io::Result<()> {
    let n = left.len().min(right.len());
    let file_length = HEADER_SIZE + (n as u32) * 4;

    let mut writer = BufWriter::new(File::create(path)?);
    write_header(&mut writer, file_length, 2, sample_rate)?;
    for i in 0..n {
        writer.write_all(&left[i].to_ne_bytes())?;
        writer.write_all(&right[i].to_ne_bytes())?;
    }
    writer.flush()
}

/// 인터리브된 시퀀스를 WAV로 기록
pub fn write_wav_interleaved(
    path: &Path,
    samples: &[i16],
    channels: u16,
    sample_rate: u32,
) -> io::Result<()> {
    let file_length = HEADER_SIZE + (samples.len() as u32) * 2;

    let mut writer = BufWriter::new(File::create(path)?);
    write_header(&mut writer, file_length, channels, sample_rate)?;
    for sample in samples {
        writer.write_all(&sample.to_ne_bytes())?;
    }
    writer.flush()
}

/// RIFF 헤더의 fmt 청크에서 오디오 파라미터를 읽음
/// WAV 디코더가 보고하는 코덱 기본값 대신 이 값을 신뢰한다
pub fn read_wav_audio_params(path: &Path) -> io::Result<AudioParams> {
    let mut reader = BufReader::new(File::open(path)?);

    let mut riff = [0u8; 12];
    reader.read_exact(&mut riff)?;
    if &riff[0..4] != b"RIFF" || &riff[8..12] != b"WAVE" {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "not a RIFF/WAVE file",
        ));
    }

    // fmt 청크 탐색 (fmt 앞에 다른 청크가 올 수도 있음)
    loop {
        let mut chunk_header = [0u8; 8];
        reader.read_exact(&mut chunk_header)?;
        let chunk_size = u32::from_le_bytes([
            chunk_header[4],
            chunk_header[5],
            chunk_header[6],
            chunk_header[7],
        ]);

        if &chunk_header[0..4] != b"fmt " {
            reader.seek(SeekFrom::Current(chunk_size as i64))?;
            continue;
        }

        if chunk_size < 16 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "fmt chunk too small",
            ));
        }

        let mut fmt = [0u8; 16];
        reader.read_exact(&mut fmt)?;
        let format_tag = u16::from_le_bytes([fmt[0], fmt[1]]);
        let channels = u16::from_le_bytes([fmt[2], fmt[3]]);
        let sample_rate = u32::from_le_bytes([fmt[4], fmt[5], fmt[6], fmt[7]]);
        let bits_per_sample = u16::from_le_bytes([fmt[14], fmt[15]]);

        let sample_format = match (format_tag, bits_per_sample) {
            (1, 8) => Sample::U8(SampleType::Packed),
            (1, 16) => Sample::I16(SampleType::Packed),
            (1, 32) => Sample::I32(SampleType::Packed),
            (3, 32) => Sample::F32(SampleType::Packed),
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "unsupported WAV format: tag={} bits={}",
                        format_tag, bits_per_sample
                    ),
                ))
            }
        };

        return Ok(AudioParams::new(channels, sample_format, sample_rate));
    }
}
