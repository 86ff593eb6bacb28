// 오디오 로더 - 디코드 → 리샘플 윈도우 → 변환 → 16-bit PCM 시퀀스 파이프라인
// 출력은 항상 44.1kHz / 스테레오 / 16-bit (인터리브 또는 채널 분리)

use ffmpeg_next as ffmpeg;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use ffmpeg::format::sample::Type as SampleType;
use ffmpeg::format::Sample;

use crate::audio::params::AudioParams;
use crate::audio::reader_decoder::{AudioReaderDecoder, DecoderInitState};
use crate::audio::resampler::{AudioResampler, ResamplerInitState};
use crate::audio::window::{ChunkLayout, DecodedChunk, ResampleWindow};
use crate::wav;

/// 출력 포맷 상수
const OUTPUT_SAMPLE_RATE: u32 = 44100;
const OUTPUT_CHANNELS: u16 = 2;

/// mp3 인코더의 priming 샘플 수 (인코더 look-ahead로 생기는 선행 샘플)
/// 마지막 leftover 변환의 요청 샘플 수에만 1회 가산된다
const MP3_PRIMING_SAMPLES: usize = 1152;

/// 출력 시퀀스 구성 (생성 시 선택)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputLayout {
    /// L R L R ... 인터리브 단일 시퀀스
    Interleaved,
    /// 좌/우 채널 분리 시퀀스
    SplitChannels,
}

/// 최종 PCM 시퀀스 (append-only, 노출 후에는 읽기 전용)
pub enum OutputSamples {
    Interleaved(Vec<i16>),
    Split { left: Vec<i16>, right: Vec<i16> },
}

impl OutputSamples {
    fn empty(layout: OutputLayout) -> Self {
        match layout {
            OutputLayout::Interleaved => OutputSamples::Interleaved(Vec::new()),
            OutputLayout::SplitChannels => OutputSamples::Split {
                left: Vec::new(),
                right: Vec::new(),
            },
        }
    }

    /// 채널 구분 없이 저장된 전체 샘플 수
    pub fn total_len(&self) -> usize {
        match self {
            OutputSamples::Interleaved(seq) => seq.len(),
            OutputSamples::Split { left, right } => left.len() + right.len(),
        }
    }
}

/// 파이프라인 상태 (실패 시 원인 단계)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderState {
    Ok,
    NoInit,
    ReaderDecoderInitFails,
    ResamplerInitFails,
    UnsupportedChannelCount,
}

/// 로드 실패 원인
/// 세부 단계는 reader_init_state() / resampler_init_state()로도 조회 가능
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadError {
    ReaderDecoderInit(DecoderInitState),
    ResamplerInit(ResamplerInitState),
    /// 3채널 이상 소스는 명시적으로 거부 (조용히 버리지 않음)
    UnsupportedChannelCount(u16),
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::ReaderDecoderInit(state) => {
                write!(f, "reader/decoder init failed: {:?}", state)
            }
            LoadError::ResamplerInit(state) => write!(f, "resampler init failed: {:?}", state),
            LoadError::UnsupportedChannelCount(n) => {
                write!(f, "unsupported channel count: {} (only 1-2 supported)", n)
            }
        }
    }
}

impl std::error::Error for LoadError {}

/// 오디오 로더 파이프라인
pub struct AudioLoader {
    path: PathBuf,
    output_layout: OutputLayout,
    force_little_endian: bool,
    state: LoaderState,
    reader_state: DecoderInitState,
    resampler_state: ResamplerInitState,
    priming_adjustment: usize,
    input_params: Option<AudioParams>,
    samples: OutputSamples,
}

impl AudioLoader {
    pub fn new<P: AsRef<Path>>(
        path: P,
        output_layout: OutputLayout,
        force_little_endian: bool,
    ) -> Self {
        let path = path.as_ref().to_path_buf();

        // 포맷별 priming 보정 (확장자 기준)
        let priming_adjustment = match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("mp3") => MP3_PRIMING_SAMPLES,
            _ => 0,
        };

        Self {
            path,
            output_layout,
            force_little_endian,
            state: LoaderState::NoInit,
            reader_state: DecoderInitState::NoInit,
            resampler_state: ResamplerInitState::NoInit,
            priming_adjustment,
            input_params: None,
            samples: OutputSamples::empty(output_layout),
        }
    }

    /// 전체 파이프라인 실행: 열기 → 디코드/누적/변환 → 마지막 leftover + flush
    pub fn load_audio_data(&mut self) -> Result<(), LoadError> {
        let mut reader = match AudioReaderDecoder::open(&self.path) {
            Ok(reader) => {
                self.reader_state = DecoderInitState::Ok;
                reader
            }
            Err(state) => {
                self.reader_state = state;
                self.state = LoaderState::ReaderDecoderInitFails;
                return Err(LoadError::ReaderDecoderInit(state));
            }
        };

        let input_params = reader.audio_params();
        self.input_params = Some(input_params);

        if input_params.channel_count == 0 || input_params.channel_count > 2 {
            self.state = LoaderState::UnsupportedChannelCount;
            return Err(LoadError::UnsupportedChannelCount(input_params.channel_count));
        }

        // 리샘플러에는 항상 packed 데이터를 공급 (planar는 윈도우 복사 시 인터리브)
        let resampler_input = input_params.packed();
        let output_params = AudioParams::new(
            OUTPUT_CHANNELS,
            Sample::I16(SampleType::Packed),
            OUTPUT_SAMPLE_RATE,
        );

        let mut resampler = AudioResampler::new(
            resampler_input,
            input_params.sample_rate as usize,
            output_params,
        );
        match resampler.initialize() {
            ResamplerInitState::Ok => self.resampler_state = ResamplerInitState::Ok,
            state => {
                self.resampler_state = state;
                self.state = LoaderState::ResamplerInitFails;
                return Err(LoadError::ResamplerInit(state));
            }
        }

        // 윈도우 용량 = 입력 샘플레이트 1초 분량
        let mut window = ResampleWindow::new(
            input_params.sample_rate as usize,
            input_params.channel_count,
            input_params.bytes_per_sample,
        );

        let chunk_layout = if input_params.is_planar() {
            if input_params.channel_count == 1 {
                ChunkLayout::PlanarMono
            } else {
                ChunkLayout::PlanarStereo
            }
        } else {
            ChunkLayout::Packed
        };

        let mut out = OutputSamples::empty(self.output_layout);

        reader.read_and_decode(|frame| {
            let planes: [&[u8]; 2] = match chunk_layout {
                ChunkLayout::PlanarStereo => [frame.data(0), frame.data(1)],
                _ => [frame.data(0), &[]],
            };
            let chunk = DecodedChunk {
                layout: chunk_layout,
                planes,
                samples: frame.samples(),
            };
            process_decoded_chunk(&chunk, &mut window, &mut resampler, &mut out);
        });

        // 마지막 leftover: priming 보정을 요청 샘플 수에 1회만 가산
        if !window.is_empty() {
            let request =
                final_convert_request(window.len(), self.priming_adjustment, window.capacity());
            resampler.convert_packed(window.data(), request);
            append_converted(&mut out, resampler.output());
            window.reset();
        }

        // 리샘플러 내부 지연 라인 배출
        if resampler.flush() > 0 {
            append_converted(&mut out, resampler.output());
        }

        if self.force_little_endian {
            normalize_to_little_endian(&mut out);
        }

        debug_log!(
            "[LOAD] {:?}: {} output samples",
            self.path,
            out.total_len()
        );

        self.samples = out;
        self.state = LoaderState::Ok;
        Ok(())
    }

    pub fn state(&self) -> LoaderState {
        self.state
    }

    /// 리더/디코더의 초기화 상태 (실패 원인 조회용)
    pub fn reader_init_state(&self) -> DecoderInitState {
        self.reader_state
    }

    /// 리샘플러의 초기화 상태 (실패 원인 조회용)
    pub fn resampler_init_state(&self) -> ResamplerInitState {
        self.resampler_state
    }

    /// 소스의 입력 파라미터 (open 이후에만 Some)
    pub fn input_params(&self) -> Option<AudioParams> {
        self.input_params
    }

    pub fn samples(&self) -> &OutputSamples {
        &self.samples
    }

    /// 인터리브 모드의 전체 시퀀스
    pub fn processed_audio(&self) -> Option<&[i16]> {
        match &self.samples {
            OutputSamples::Interleaved(seq) => Some(seq),
            OutputSamples::Split { .. } => None,
        }
    }

    /// 채널 분리 모드의 좌/우 시퀀스
    pub fn channel_data(&self) -> Option<(&[i16], &[i16])> {
        match &self.samples {
            OutputSamples::Interleaved(_) => None,
            OutputSamples::Split { left, right } => Some((left, right)),
        }
    }

    /// 결과를 WAV 파일로 저장
    pub fn write_wav(&self, path: &Path) -> io::Result<()> {
        match &self.samples {
            OutputSamples::Interleaved(seq) => {
                wav::write_wav_interleaved(path, seq, OUTPUT_CHANNELS, OUTPUT_SAMPLE_RATE)
            }
            OutputSamples::Split { left, right } => {
                wav::write_wav_split(path, left, right, OUTPUT_SAMPLE_RATE)
            }
        }
    }
}

/// 청크 1개를 윈도우에 누적, 가득 찰 때마다 변환
/// 윈도우보다 큰 청크도 루프로 전량 소비됨 (샘플 유실/오버플로 없음)
fn process_decoded_chunk(
    chunk: &DecodedChunk,
    window: &mut ResampleWindow,
    resampler: &mut AudioResampler,
    out: &mut OutputSamples,
) {
    let mut consumed = 0;
    while consumed < chunk.samples {
        consumed += window.push(chunk, consumed);
        if window.is_full() {
            resampler.convert_packed(window.data(), window.capacity());
            append_converted(out, resampler.output());
            window.reset();
        }
    }
}

/// 마지막 leftover 변환의 요청 샘플 수
/// priming 보정은 여기에만 적용되고 용량을 넘지 않는다
fn final_convert_request(residue: usize, priming: usize, capacity: usize) -> usize {
    (residue + priming).min(capacity)
}

/// 변환 결과(packed S16 스테레오 바이트)를 출력 시퀀스에 추가
fn append_converted(out: &mut OutputSamples, bytes: &[u8]) {
    match out {
        OutputSamples::Interleaved(seq) => {
            for pair in bytes.chunks_exact(2) {
                seq.push(i16::from_ne_bytes([pair[0], pair[1]]));
            }
        }
        OutputSamples::Split { left, right } => {
            for quad in bytes.chunks_exact(4) {
                left.push(i16::from_ne_bytes([quad[0], quad[1]]));
                right.push(i16::from_ne_bytes([quad[2], quad[3]]));
            }
        }
    }
}

/// 리틀엔디언 정규화: 빅엔디언 호스트에서만 전체 시퀀스를 1회 스왑
fn normalize_to_little_endian(out: &mut OutputSamples) {
    if !cfg!(target_endian = "big") {
        return;
    }
    match out {
        OutputSamples::Interleaved(seq) => swap_sequence(seq),
        OutputSamples::Split { left, right } => {
            swap_sequence(left);
            swap_sequence(right);
        }
    }
}

fn swap_sequence(seq: &mut [i16]) {
    for sample in seq.iter_mut() {
        *sample = sample.swap_bytes();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn priming_applies_only_to_final_request_and_respects_capacity() {
        // 내부 full-window 변환은 항상 capacity를 그대로 요청하므로
        // priming이 영향을 주는 곳은 이 계산 하나뿐이다
        assert_eq!(final_convert_request(100, 1152, 44100), 1252);
        assert_eq!(final_convert_request(44000, 1152, 44100), 44100);
        assert_eq!(final_convert_request(0, 1152, 44100), 1152);
        assert_eq!(final_convert_request(500, 0, 44100), 500);
    }

    #[test]
    fn byte_swap_is_idempotent_under_double_application() {
        let original = vec![0x1234i16, -0x0102, 0, i16::MAX, i16::MIN];
        let mut swapped = original.clone();
        swap_sequence(&mut swapped);
        swap_sequence(&mut swapped);
        assert_eq!(swapped, original);
    }

    #[test]
    fn normalization_is_noop_when_host_order_matches() {
        if cfg!(target_endian = "big") {
            return; // 이 테스트는 리틀엔디언 호스트 전용
        }
        let mut out = OutputSamples::Interleaved(vec![1i16, 2, 3]);
        normalize_to_little_endian(&mut out);
        match out {
            OutputSamples::Interleaved(seq) => assert_eq!(seq, vec![1, 2, 3]),
            _ => unreachable!(),
        }
    }

    #[test]
    fn mp3_extension_selects_priming_adjustment() {
        let loader = AudioLoader::new("track.mp3", OutputLayout::Interleaved, false);
        assert_eq!(loader.priming_adjustment, MP3_PRIMING_SAMPLES);
        let loader = AudioLoader::new("track.MP3", OutputLayout::Interleaved, false);
        assert_eq!(loader.priming_adjustment, MP3_PRIMING_SAMPLES);
        let loader = AudioLoader::new("track.wav", OutputLayout::Interleaved, false);
        assert_eq!(loader.priming_adjustment, 0);
    }

    #[test]
    fn missing_file_reports_reader_decoder_failure() {
        let mut loader = AudioLoader::new("no-such-file.mp3", OutputLayout::Interleaved, false);
        assert_eq!(loader.state(), LoaderState::NoInit);

        let err = loader.load_audio_data().unwrap_err();
        assert!(matches!(err, LoadError::ReaderDecoderInit(_)));
        assert_eq!(loader.state(), LoaderState::ReaderDecoderInitFails);
        assert_ne!(loader.reader_init_state(), DecoderInitState::Ok);
        // 리샘플러까지 도달하지 못함
        assert_eq!(loader.resampler_init_state(), ResamplerInitState::NoInit);
    }

    // 이하 통합 테스트는 TestMedia의 실제 파일 필요 (원본 테스트 자산과 동일 구성:
    // Audacity로 생성한 5초 사인파들)
    const EXPECTED_FIVE_SECOND_STEREO_LEN: usize = 44100 * 2 * 5;

    #[test]
    #[ignore] // 실제 오디오 파일 필요
    fn five_second_mp3_has_matching_decoded_length() {
        let path = PathBuf::from("TestMedia/five second mono sine wave.mp3");
        let mut loader = AudioLoader::new(&path, OutputLayout::Interleaved, false);
        loader.load_audio_data().expect("load failed");

        let samples = loader.processed_audio().expect("interleaved output");
        assert_eq!(samples.len(), EXPECTED_FIVE_SECOND_STEREO_LEN);
    }

    #[test]
    #[ignore] // 실제 오디오 파일 필요
    fn wav_import_works_without_codec_default_hack() {
        let path = PathBuf::from("TestMedia/sine.wav");
        let mut loader = AudioLoader::new(&path, OutputLayout::Interleaved, false);
        loader.load_audio_data().expect("load failed");

        let samples = loader.processed_audio().expect("interleaved output");
        assert_eq!(samples.len(), EXPECTED_FIVE_SECOND_STEREO_LEN);
    }

    fn first_index_where(samples: &[i16], pred: impl Fn(i16) -> bool) -> usize {
        samples
            .iter()
            .position(|&s| pred(s))
            .unwrap_or(samples.len())
    }

    fn near_peak(s: i16) -> bool {
        (s as i32 - 18000).abs() < 50
    }

    /// 좌채널만 따라가며 (stride 2) 피크까지 단조 증가하는지 확인
    fn values_always_increasing(samples: &[i16], until: usize) -> bool {
        if until < 4 {
            return true;
        }
        samples[..until]
            .iter()
            .step_by(2)
            .zip(samples[2..until].iter().step_by(2))
            .all(|(a, b)| a < b)
    }

    #[test]
    #[ignore] // 실제 오디오 파일 필요
    fn thirty_two_khz_mp3_discards_priming_samples() {
        let path = PathBuf::from("TestMedia/five second stereo 32kHz sine wave.mp3");
        let mut loader = AudioLoader::new(&path, OutputLayout::Interleaved, false);
        loader.load_audio_data().expect("load failed");
        let samples = loader.processed_audio().expect("interleaved output");

        // priming이 제대로 버려졌으면 시작은 거의 무음이고, 이 사인파의 피크는
        // t = 0.0005초 → 44.1kHz 기준 index 44 근처에서 나와야 한다
        let silence_index = first_index_where(samples, |s| s.abs() < 110);
        assert_eq!(silence_index, 0);

        let peak_index = first_index_where(samples, near_peak);
        assert!(
            (peak_index as i64 - 44).abs() < 8,
            "peak at {}",
            peak_index
        );

        assert!(values_always_increasing(samples, peak_index));
    }

    #[test]
    #[ignore] // 실제 오디오 파일 필요
    fn forty_eight_khz_mp3_discards_priming_samples() {
        let path = PathBuf::from("TestMedia/five second stereo 48kHz sine wave.mp3");
        let mut loader = AudioLoader::new(&path, OutputLayout::Interleaved, false);
        loader.load_audio_data().expect("load failed");
        let samples = loader.processed_audio().expect("interleaved output");

        let silence_index = first_index_where(samples, |s| s.abs() < 110);
        assert_eq!(silence_index, 0);

        let peak_index = first_index_where(samples, near_peak);
        assert!(
            (peak_index as i64 - 44).abs() < 8,
            "peak at {}",
            peak_index
        );
    }

    #[test]
    #[ignore] // 실제 오디오 파일 필요
    fn split_channel_mode_yields_equal_length_channels() {
        let path = PathBuf::from("TestMedia/five second mono sine wave.mp3");
        let mut loader = AudioLoader::new(&path, OutputLayout::SplitChannels, false);
        loader.load_audio_data().expect("load failed");

        let (left, right) = loader.channel_data().expect("split output");
        assert_eq!(left.len(), right.len());
        assert_eq!(left.len() + right.len(), EXPECTED_FIVE_SECOND_STEREO_LEN);
    }
}
