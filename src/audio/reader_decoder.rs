// 오디오 리더/디코더 - 컨테이너 열기 + 오디오 스트림 선택 + 디코드 루프
// 디코드된 프레임은 콜백으로 전달 (프레임 버퍼는 콜백 동안만 유효)

use ffmpeg_next as ffmpeg;
use std::path::{Path, PathBuf};

use crate::audio::params::AudioParams;
use crate::wav;

/// 초기화 단계별 실패 원인
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderInitState {
    Ok,
    NoInit,
    /// 컨테이너 열기 실패
    OpenFails,
    /// 스트림 정보 탐색 실패 (ffmpeg-next는 open과 probe를 한 호출로 묶으므로
    /// probe 계열 에러(InvalidData/Eof)를 이쪽으로 매핑)
    FindStreamInfoFails,
    /// 오디오 스트림 없음
    NoAudioStream,
    /// 디코더를 찾지 못함
    FindDecoderFails,
    /// 코덱 열기 실패
    CodecOpenFails,
}

/// 오디오 리더/디코더
pub struct AudioReaderDecoder {
    path: PathBuf,
    input_ctx: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Audio,
    params: AudioParams,
}

impl AudioReaderDecoder {
    /// 파일 열기 + 오디오 스트림 선택 + 디코더 오픈
    /// 실패 시 해당 단계의 DecoderInitState 반환
    pub fn open(file_path: &Path) -> Result<Self, DecoderInitState> {
        crate::init_ffmpeg();

        let input_ctx = ffmpeg::format::input(&file_path).map_err(|e| match e {
            ffmpeg::Error::InvalidData | ffmpeg::Error::Eof => {
                DecoderInitState::FindStreamInfoFails
            }
            _ => DecoderInitState::OpenFails,
        })?;

        let audio_stream = input_ctx
            .streams()
            .best(ffmpeg::media::Type::Audio)
            .ok_or(DecoderInitState::NoAudioStream)?;

        let stream_index = audio_stream.index();
        let codec_params = audio_stream.parameters();
        let codec_id = codec_params.id();

        let context = ffmpeg::codec::context::Context::from_parameters(codec_params)
            .map_err(|_| DecoderInitState::CodecOpenFails)?;
        let decoder = context.decoder().audio().map_err(|e| match e {
            ffmpeg::Error::DecoderNotFound => DecoderInitState::FindDecoderFails,
            _ => DecoderInitState::CodecOpenFails,
        })?;

        // WAV 디코더 결함 워크어라운드: 레거시 PCM 코덱 id는 코덱 기본값 대신
        // 컨테이너(RIFF fmt 청크)에서 직접 파라미터를 읽는다
        let params = if codec_id == ffmpeg::codec::Id::PCM_S16LE {
            match wav::read_wav_audio_params(file_path) {
                Ok(p) => p,
                Err(e) => {
                    log::warn!(
                        "WAV header parse failed for {:?}, falling back to decoder params: {}",
                        file_path,
                        e
                    );
                    params_from_decoder(&decoder)
                }
            }
        } else {
            params_from_decoder(&decoder)
        };

        Ok(Self {
            path: file_path.to_path_buf(),
            input_ctx,
            stream_index,
            decoder,
            params,
        })
    }

    /// 유효 오디오 파라미터 (WAV 워크어라운드 반영됨)
    pub fn audio_params(&self) -> AudioParams {
        self.params
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 패킷 읽기 → 디코드 → 콜백 루프
    /// - 선택된 스트림 외 패킷은 버림
    /// - 디코더는 패킷당 0~N개 프레임을 낼 수 있으므로 EAGAIN까지 내부 드레인
    /// - EOF는 null 패킷(send_eof) 제출 후 잔여 프레임 드레인으로 처리
    pub fn read_and_decode<F>(&mut self, mut callback: F)
    where
        F: FnMut(&ffmpeg::frame::Audio),
    {
        let mut frame_count: u64 = 0;

        for (stream, packet) in self.input_ctx.packets() {
            if stream.index() != self.stream_index {
                continue;
            }
            let _ = self.decoder.send_packet(&packet);
            frame_count += drain_decoded(&mut self.decoder, &mut callback);
        }

        let _ = self.decoder.send_eof();
        frame_count += drain_decoded(&mut self.decoder, &mut callback);

        debug_log!("[DECODE] {} frames decoded from {:?}", frame_count, self.path);
        let _ = frame_count;
    }
}

/// 디코더 파라미터 → AudioParams
fn params_from_decoder(decoder: &ffmpeg::codec::decoder::Audio) -> AudioParams {
    AudioParams::new(decoder.channels(), decoder.format(), decoder.rate())
}

/// 디코더 버퍼에서 "need more input"까지 프레임 수신 (모듈 레벨 함수 - borrow 충돌 방지)
fn drain_decoded<F>(decoder: &mut ffmpeg::codec::decoder::Audio, callback: &mut F) -> u64
where
    F: FnMut(&ffmpeg::frame::Audio),
{
    let mut count = 0;
    loop {
        let mut decoded = ffmpeg::frame::Audio::empty();
        if decoder.receive_frame(&mut decoded).is_err() {
            break;
        }
        callback(&decoded);
        count += 1;
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn open_missing_file_reports_open_failure() {
        let path = PathBuf::from("definitely-not-here.mp3");
        match AudioReaderDecoder::open(&path) {
            Err(DecoderInitState::OpenFails) | Err(DecoderInitState::FindStreamInfoFails) => {}
            other => panic!("expected open failure, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    #[ignore] // 실제 오디오 파일 필요
    fn open_and_decode_real_file() {
        let path = PathBuf::from("TestMedia/five second mono sine wave.mp3");
        let mut reader = AudioReaderDecoder::open(&path).expect("open failed");

        let params = reader.audio_params();
        assert!(params.sample_rate > 0);
        assert!(params.channel_count >= 1);

        let mut total_samples = 0usize;
        reader.read_and_decode(|frame| {
            total_samples += frame.samples();
        });
        assert!(total_samples > 0);
    }
}
