// 비디오 내보내기 - H.264 + AAC 인코딩 → MP4 먹싱
// 비디오 인코더의 실제 진행량(PTS 전진)에 오디오 공급을 묶는 이중 클럭 페이싱

use ffmpeg_next as ffmpeg;
use std::path::{Path, PathBuf};

use ffmpeg::codec;
use ffmpeg::format::sample::Type as SampleType;
use ffmpeg::format::{Pixel, Sample};
use ffmpeg::software::scaling;

use crate::encoding::audio_frame::AudioFrameAccumulator;

/// 프레임 인덱스를 받아 RGB24 픽셀 버퍼를 채우는 생성기 (stride 포함 버퍼)
pub type VideoFrameFn = Box<dyn FnMut(&mut [u8], u32)>;
/// 요청된 길이의 좌/우 f32 샘플 버퍼를 채우는 생성기
pub type AudioChunkFn = Box<dyn FnMut(&mut [f32], &mut [f32])>;
/// 매 비디오 프레임 반복마다 1회 조회되는 협조적 취소
pub type CancelFn = Box<dyn FnMut() -> bool>;
/// 0~100 진행률 콜백
pub type ProgressFn = Box<dyn FnMut(u32)>;

const VIDEO_STREAM_INDEX: usize = 0;
const AUDIO_STREAM_INDEX: usize = 1;
const AUDIO_BIT_RATE: usize = 128_000;
const VIDEO_GOP_SIZE: u32 = 40;

/// 내보내기 파라미터
/// 입력은 RGB24 고정, fps/샘플레이트는 정수 (고정 프레임레이트 전용)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportParams {
    pub pixel_format: Pixel,
    pub width: u32,
    pub height: u32,
    pub fps: i32,
    pub audio_sample_rate: i32,
}

/// 엄격히 전진만 하는 내보내기 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportState {
    Uninitialized,
    Initialized,
    Exporting,
    Finalized,
    Closed,
}

/// initialize() 이후에만 존재하는 인코딩 리소스 묶음
struct ExportInner {
    octx: ffmpeg::format::context::Output,
    video_encoder: ffmpeg::encoder::Video,
    audio_encoder: ffmpeg::encoder::Audio,
    scaler: scaling::Context,
    /// 호출자 생성기가 채우는 RGB24 원본 프레임
    conv_frame: ffmpeg::frame::Video,
    /// 인코더 포맷(YUV420P) 프레임 - 매 반복 색변환으로 덮어씀
    video_frame: ffmpeg::frame::Video,
    /// 인코더 포맷(FLTP) 오디오 프레임
    audio_frame: ffmpeg::frame::Audio,
    accumulator: AudioFrameAccumulator,
    video_time_base: ffmpeg::Rational,
    audio_time_base: ffmpeg::Rational,
    /// 스트림별 단조 증가 PTS (인코더 time_base 단위)
    video_pts: i64,
    audio_pts: i64,
}

/// 비디오 내보내기 파이프라인
pub struct VideoExporter {
    path: PathBuf,
    in_params: ExportParams,
    out_params: ExportParams,
    state: ExportState,
    inner: Option<ExportInner>,
    get_video: Option<VideoFrameFn>,
    get_audio: Option<AudioChunkFn>,
    cancel: Option<CancelFn>,
    progress: Option<ProgressFn>,
}

impl VideoExporter {
    /// 파라미터 검증 + 출력 파라미터 유도
    /// MP4/MOV 계열은 홀수 해상도를 싫어하므로 짝수로 올림, 픽셀 포맷은 YUV420P 고정
    pub fn new<P: AsRef<Path>>(out_path: P, params: ExportParams) -> Result<Self, String> {
        crate::init_ffmpeg();

        if params.pixel_format != Pixel::RGB24 {
            return Err(format!(
                "VideoExporter expects RGB24 input, got {:?}",
                params.pixel_format
            ));
        }
        if params.width == 0 || params.height == 0 {
            return Err(format!(
                "Invalid dimensions: {}x{}",
                params.width, params.height
            ));
        }
        if params.fps <= 0 {
            return Err(format!("Invalid fps: {}", params.fps));
        }
        if params.audio_sample_rate <= 0 {
            return Err(format!(
                "Invalid audio sample rate: {}",
                params.audio_sample_rate
            ));
        }

        let mut out_params = params;
        out_params.width += out_params.width % 2;
        out_params.height += out_params.height % 2;
        out_params.pixel_format = Pixel::YUV420P;

        Ok(Self {
            path: out_path.as_ref().to_path_buf(),
            in_params: params,
            out_params,
            state: ExportState::Uninitialized,
            inner: None,
            get_video: None,
            get_audio: None,
            cancel: None,
            progress: None,
        })
    }

    pub fn set_video_source<F: FnMut(&mut [u8], u32) + 'static>(&mut self, f: F) {
        self.get_video = Some(Box::new(f));
    }

    pub fn set_audio_source<F: FnMut(&mut [f32], &mut [f32]) + 'static>(&mut self, f: F) {
        self.get_audio = Some(Box::new(f));
    }

    pub fn set_cancel_callback<F: FnMut() -> bool + 'static>(&mut self, f: F) {
        self.cancel = Some(Box::new(f));
    }

    pub fn set_progress_callback<F: FnMut(u32) + 'static>(&mut self, f: F) {
        self.progress = Some(Box::new(f));
    }

    pub fn state(&self) -> ExportState {
        self.state
    }

    /// 짝수 보정/픽셀 포맷 유도가 끝난 실제 출력 파라미터
    pub fn output_params(&self) -> ExportParams {
        self.out_params
    }

    /// 출력 컨테이너 + 비디오/오디오 스트림 + 인코더/프레임/스케일러 준비, 헤더 기록
    /// 실패 시 그때까지 만든 리소스는 스코프 종료로 해제된 뒤 에러 반환
    pub fn initialize(&mut self) -> Result<(), String> {
        if self.state != ExportState::Uninitialized {
            return Err(format!("invalid state for initialize: {:?}", self.state));
        }

        let mut octx = ffmpeg::format::output(&self.path)
            .map_err(|e| format!("Failed to create output: {}", e))?;

        // 글로벌 헤더 플래그 사전 확인 (borrow 충돌 방지)
        let needs_global_header = octx
            .format()
            .flags()
            .contains(ffmpeg::format::flag::Flags::GLOBAL_HEADER);

        let video_codec =
            ffmpeg::encoder::find(codec::Id::H264).ok_or("H.264 encoder not found")?;
        let audio_codec = ffmpeg::encoder::find(codec::Id::AAC).ok_or("AAC encoder not found")?;

        let video_time_base = ffmpeg::Rational::new(1, self.out_params.fps);
        let audio_time_base = ffmpeg::Rational::new(1, self.out_params.audio_sample_rate);

        // 비디오 스트림 (stream 0)
        let video_encoder = {
            let mut stream = octx
                .add_stream(video_codec)
                .map_err(|e| format!("Failed to add video stream: {}", e))?;

            let mut encoder = codec::context::Context::from_parameters(stream.parameters())
                .map_err(|e| format!("Failed to create video encoder context: {}", e))?
                .encoder()
                .video()
                .map_err(|e| format!("Failed to get video encoder: {}", e))?;

            encoder.set_width(self.out_params.width);
            encoder.set_height(self.out_params.height);
            encoder.set_format(Pixel::YUV420P);
            encoder.set_time_base(video_time_base);
            encoder.set_frame_rate(Some(ffmpeg::Rational::new(self.out_params.fps, 1)));
            encoder.set_gop(VIDEO_GOP_SIZE);
            encoder.set_max_b_frames(0);
            if needs_global_header {
                encoder.set_flags(codec::flag::Flags::GLOBAL_HEADER);
            }

            // 인코딩 속도/품질
            let mut opts = ffmpeg::Dictionary::new();
            opts.set("preset", "fast");
            opts.set("crf", "18");

            let encoder = encoder
                .open_with(opts)
                .map_err(|e| format!("Failed to open video encoder: {}", e))?;
            stream.set_parameters(&encoder);
            encoder
        };

        // 오디오 스트림 (stream 1) - 스테레오 FLTP 고정, 비트레이트 128k
        let (audio_encoder, audio_frame_size) = {
            let mut stream = octx
                .add_stream(audio_codec)
                .map_err(|e| format!("Failed to add audio stream: {}", e))?;

            let mut encoder = codec::context::Context::from_parameters(stream.parameters())
                .map_err(|e| format!("Failed to create audio encoder context: {}", e))?
                .encoder()
                .audio()
                .map_err(|e| format!("Failed to get audio encoder: {}", e))?;

            encoder.set_rate(self.out_params.audio_sample_rate);
            encoder.set_format(Sample::F32(SampleType::Planar));
            encoder.set_channel_layout(ffmpeg::ChannelLayout::STEREO);
            encoder.set_bit_rate(AUDIO_BIT_RATE);
            encoder.set_time_base(audio_time_base);
            if needs_global_header {
                encoder.set_flags(codec::flag::Flags::GLOBAL_HEADER);
            }

            let encoder = encoder
                .open_as(audio_codec)
                .map_err(|e| format!("Failed to open audio encoder: {}", e))?;
            stream.set_parameters(&encoder);

            // 코덱이 0을 돌려주는 경우 대비 (AAC는 보통 1024)
            let frame_size = (encoder.frame_size() as usize).max(1024);
            (encoder, frame_size)
        };

        // RGB24 → YUV420P 색공간 변환 (해상도 변경은 짝수 보정분뿐)
        let scaler = scaling::Context::get(
            self.in_params.pixel_format,
            self.in_params.width,
            self.in_params.height,
            Pixel::YUV420P,
            self.out_params.width,
            self.out_params.height,
            scaling::Flags::FAST_BILINEAR,
        )
        .map_err(|e| format!("Failed to create scaler: {}", e))?;

        let conv_frame = ffmpeg::frame::Video::new(
            self.in_params.pixel_format,
            self.in_params.width,
            self.in_params.height,
        );
        let video_frame = ffmpeg::frame::Video::new(
            Pixel::YUV420P,
            self.out_params.width,
            self.out_params.height,
        );
        let mut audio_frame = ffmpeg::frame::Audio::new(
            Sample::F32(SampleType::Planar),
            audio_frame_size,
            ffmpeg::ChannelLayout::STEREO,
        );
        audio_frame.set_rate(self.out_params.audio_sample_rate as u32);

        octx.write_header()
            .map_err(|e| format!("Failed to write header: {}", e))?;

        self.inner = Some(ExportInner {
            octx,
            video_encoder,
            audio_encoder,
            scaler,
            conv_frame,
            video_frame,
            audio_frame,
            accumulator: AudioFrameAccumulator::new(audio_frame_size),
            video_time_base,
            audio_time_base,
            video_pts: 0,
            audio_pts: 0,
        });
        self.state = ExportState::Initialized;
        Ok(())
    }

    /// 내보내기 메인 루프
    /// 반복마다: 취소/진행률 → 비디오 생성·변환·제출 → 소비된 프레임 수만큼 오디오 공급
    pub fn export_frames(&mut self, frame_count: u32) -> Result<(), String> {
        match self.state {
            ExportState::Initialized | ExportState::Exporting => {}
            state => return Err(format!("invalid state for export: {:?}", state)),
        }
        if frame_count == 0 {
            return Ok(());
        }
        self.state = ExportState::Exporting;

        let samples_per_video_frame =
            (self.out_params.audio_sample_rate / self.out_params.fps) as usize;
        let mut left = vec![0.0f32; samples_per_video_frame];
        let mut right = vec![0.0f32; samples_per_video_frame];

        eprintln!(
            "[EXPORT] 시작: {}x{} @ {}fps, 총 {}프레임, 출력={:?}",
            self.out_params.width, self.out_params.height, self.out_params.fps, frame_count,
            self.path
        );

        let inner = self
            .inner
            .as_mut()
            .ok_or_else(|| "exporter not initialized".to_string())?;

        let mut frame_index: u32 = 0;
        while frame_index < frame_count {
            // 취소 확인 - 다음 제출 전에만 확인하는 협조적 취소
            if let Some(cancel) = self.cancel.as_mut() {
                if cancel() {
                    eprintln!("[EXPORT] 취소됨 (frame {}/{})", frame_index, frame_count);
                    return Err("Export가 취소되었습니다".to_string());
                }
            }

            if let Some(progress) = self.progress.as_mut() {
                let pct = ((frame_index as u64 + 1) * 100 / frame_count as u64).min(99) as u32;
                progress(pct);
            }

            // 비디오 프레임 채우기 (생성기 미지정 시 더미 신호)
            {
                let buf = inner.conv_frame.data_mut(0);
                match self.get_video.as_mut() {
                    Some(get_video) => get_video(buf, frame_index),
                    None => fill_default_video(buf),
                }
            }

            inner.convert_frame()?;
            let pushed = inner.push_video()?;

            // 오디오 페이싱: 인코더가 실제로 소비한 비디오 프레임 수에 비례해 공급
            // (인코더 버퍼링 때문에 제출 수와 소비 수가 다를 수 있음)
            for _ in 0..pushed {
                match self.get_audio.as_mut() {
                    Some(get_audio) => get_audio(&mut left, &mut right),
                    None => fill_default_audio(&mut left, &mut right),
                }
                inner.push_audio(&left, &right)?;
            }

            frame_index = frame_index.saturating_add(pushed as u32);

            // 매 300프레임(~수초)마다 로그
            if frame_index % 300 == 0 {
                eprintln!("[EXPORT] 진행: {}/{}", frame_index, frame_count);
            }
        }

        Ok(())
    }

    /// 인코더 flush + 트레일러 기록 + 출력 파일 닫기
    /// 누적 버퍼의 오디오 잔여분(프레임 미만)은 버려짐 - 허용 오차는 프레임 1개 이내
    pub fn complete_export(&mut self) -> Result<(), String> {
        match self.state {
            ExportState::Initialized | ExportState::Exporting => {}
            state => return Err(format!("invalid state for complete_export: {:?}", state)),
        }

        let mut inner = self
            .inner
            .take()
            .ok_or_else(|| "exporter not initialized".to_string())?;

        let result = inner
            .flush_encoders()
            .and_then(|_| {
                inner
                    .octx
                    .write_trailer()
                    .map_err(|e| format!("Failed to write trailer: {}", e))
            });

        match result {
            Ok(()) => {
                self.state = ExportState::Finalized;
                // 출력 컨텍스트/인코더 해제 → 파일 닫힘
                drop(inner);
                self.state = ExportState::Closed;
                if let Some(progress) = self.progress.as_mut() {
                    progress(100);
                }
                eprintln!("[EXPORT] 완료: {:?}", self.path);
                Ok(())
            }
            Err(e) => {
                // 치명적 실패: 불완전 파일을 남기고 닫는다 (정리는 호출자 책임)
                drop(inner);
                self.state = ExportState::Closed;
                Err(e)
            }
        }
    }
}

impl ExportInner {
    /// RGB24 원본 프레임 → YUV420P 인코더 프레임 색변환
    fn convert_frame(&mut self) -> Result<(), String> {
        self.scaler
            .run(&self.conv_frame, &mut self.video_frame)
            .map_err(|e| format!("Scaler failed: {}", e))
    }

    /// 비디오 제출/드레인 재시도 루프
    /// 패킷이 나올 때까지 같은 프레임을 PTS만 전진시켜 재제출 (인코더 워밍업 구간)
    /// 반환값 = 이번 호출로 전진한 PTS 틱 수 = 소비된 논리 프레임 수
    fn push_video(&mut self) -> Result<i64, String> {
        let pts_before = self.video_pts;

        loop {
            self.video_frame.set_pts(Some(self.video_pts));
            self.video_encoder
                .send_frame(&self.video_frame)
                .map_err(|e| format!("Failed to send video frame: {}", e))?;
            self.video_pts += 1;

            let mut packet = ffmpeg::Packet::empty();
            match self.video_encoder.receive_packet(&mut packet) {
                Ok(()) => {
                    let tb = self.video_time_base;
                    self.write_packet(&mut packet, VIDEO_STREAM_INDEX, tb)?;
                    break;
                }
                // EAGAIN = 입력을 더 달라는 뜻이지 에러가 아님
                Err(ffmpeg::Error::Other { errno }) if errno == libc::EAGAIN => continue,
                Err(e) => return Err(format!("Failed to receive video packet: {}", e)),
            }
        }

        // 추가로 준비된 패킷이 있으면 모두 기록
        let tb = self.video_time_base;
        let mut packet = ffmpeg::Packet::empty();
        while self.video_encoder.receive_packet(&mut packet).is_ok() {
            self.write_packet(&mut packet, VIDEO_STREAM_INDEX, tb)?;
        }

        Ok(self.video_pts - pts_before)
    }

    /// 누적 버퍼를 거쳐 오디오 공급, 정확히 가득 찰 때마다 인코드
    fn push_audio(&mut self, left: &[f32], right: &[f32]) -> Result<(), String> {
        let total = left.len().min(right.len());
        let mut consumed = 0;
        while consumed < total {
            consumed += self.accumulator.fill(&left[consumed..], &right[consumed..]);
            if self.accumulator.is_full() {
                self.encode_pending_audio()?;
            }
        }
        Ok(())
    }

    /// 가득 찬 누적 버퍼 → FLTP 프레임 → 제출/드레인, PTS는 샘플 수만큼 전진
    fn encode_pending_audio(&mut self) -> Result<(), String> {
        let n = self.accumulator.len();
        let byte_count = n * std::mem::size_of::<f32>();
        {
            let (left, right) = self.accumulator.planes();
            // FLTP: plane 0 = 좌, plane 1 = 우
            unsafe {
                std::ptr::copy_nonoverlapping(
                    left.as_ptr() as *const u8,
                    self.audio_frame.data_mut(0).as_mut_ptr(),
                    byte_count,
                );
                std::ptr::copy_nonoverlapping(
                    right.as_ptr() as *const u8,
                    self.audio_frame.data_mut(1).as_mut_ptr(),
                    byte_count,
                );
            }
        }

        self.audio_frame.set_pts(Some(self.audio_pts));
        self.audio_encoder
            .send_frame(&self.audio_frame)
            .map_err(|e| format!("Failed to send audio frame: {}", e))?;
        self.audio_pts += n as i64;

        // EAGAIN이면 입력을 더 모아야 한다는 뜻 → 루프가 자연 종료되고 다음 채움을 기다림
        let tb = self.audio_time_base;
        let mut packet = ffmpeg::Packet::empty();
        while self.audio_encoder.receive_packet(&mut packet).is_ok() {
            self.write_packet(&mut packet, AUDIO_STREAM_INDEX, tb)?;
        }

        self.accumulator.reset();
        Ok(())
    }

    /// 패킷을 스트림 time_base로 리스케일 후 인터리브 기록
    fn write_packet(
        &mut self,
        packet: &mut ffmpeg::Packet,
        stream_index: usize,
        encoder_time_base: ffmpeg::Rational,
    ) -> Result<(), String> {
        packet.set_stream(stream_index);
        let stream_time_base = self
            .octx
            .stream(stream_index)
            .ok_or_else(|| format!("output stream {} not found", stream_index))?
            .time_base();
        packet.rescale_ts(encoder_time_base, stream_time_base);
        packet
            .write_interleaved(&mut self.octx)
            .map_err(|e| format!("Failed to write packet: {}", e))
    }

    /// 양쪽 인코더에 EOF 제출 후 버퍼된 패킷 전부 기록 (오디오 → 비디오 순)
    fn flush_encoders(&mut self) -> Result<(), String> {
        self.audio_encoder
            .send_eof()
            .map_err(|e| format!("Failed to send audio EOF: {}", e))?;
        let tb = self.audio_time_base;
        let mut packet = ffmpeg::Packet::empty();
        while self.audio_encoder.receive_packet(&mut packet).is_ok() {
            self.write_packet(&mut packet, AUDIO_STREAM_INDEX, tb)?;
        }

        self.video_encoder
            .send_eof()
            .map_err(|e| format!("Failed to send video EOF: {}", e))?;
        let tb = self.video_time_base;
        let mut packet = ffmpeg::Packet::empty();
        while self.video_encoder.receive_packet(&mut packet).is_ok() {
            self.write_packet(&mut packet, VIDEO_STREAM_INDEX, tb)?;
        }

        Ok(())
    }
}

/// 기본 더미 비디오: 단색 빨강 (RGB24)
fn fill_default_video(buf: &mut [u8]) {
    for (i, byte) in buf.iter_mut().enumerate() {
        *byte = if i % 3 == 0 { 0xff } else { 0x00 };
    }
}

/// 기본 더미 오디오: 좌우 고정 레벨 테스트 신호
fn fill_default_audio(left: &mut [f32], right: &mut [f32]) {
    left.fill(0.6);
    right.fill(-0.4);
}
