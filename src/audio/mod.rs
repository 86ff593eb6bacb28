// 오디오 디코드 파이프라인 모듈
// 컨테이너 → 디코더 → 리샘플 윈도우 → 리샘플러 → 16-bit PCM 시퀀스

pub mod loader;
pub mod params;
pub mod reader_decoder;
pub mod resampler;
pub mod window;

pub use loader::{AudioLoader, LoadError, LoaderState, OutputLayout, OutputSamples};
pub use params::AudioParams;
pub use reader_decoder::{AudioReaderDecoder, DecoderInitState};
pub use resampler::{AudioResampler, ResamplerInitState};
pub use window::{ChunkLayout, DecodedChunk, ResampleWindow};
