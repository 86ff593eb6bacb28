// Transcode 엔진
// Rust + ffmpeg-next 기반 오디오 트랜스코딩 / 비디오 내보내기 엔진

use std::sync::Once;

/// 디버그 로그 매크로 — `cargo build --features debug_log` 시에만 출력
/// 평소 릴리스 빌드에서는 컴파일 자체에서 제외됨
#[macro_export]
macro_rules! debug_log {
    ($($arg:tt)*) => {
        #[cfg(feature = "debug_log")]
        eprintln!($($arg)*);
    };
}

pub mod audio;
pub mod encoding;
pub mod wav;

pub use audio::loader::{AudioLoader, LoadError, LoaderState, OutputLayout, OutputSamples};
pub use audio::params::AudioParams;
pub use audio::reader_decoder::{AudioReaderDecoder, DecoderInitState};
pub use audio::resampler::{AudioResampler, ResamplerInitState};
pub use audio::window::{ChunkLayout, DecodedChunk, ResampleWindow};
pub use encoding::exporter::{ExportParams, ExportState, VideoExporter};

static FFMPEG_INIT: Once = Once::new();

/// 프로세스 전역 FFmpeg 초기화 (코덱/포맷 등록)
/// 여러 번 불러도 실제 등록은 최초 1회만 수행됨
pub fn init_ffmpeg() {
    FFMPEG_INIT.call_once(|| {
        if let Err(e) = ffmpeg_next::init() {
            log::error!("FFmpeg init failed: {}", e);
        }
    });
}
