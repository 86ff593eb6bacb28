// 오디오 리샘플러 - swresample 래퍼 (포맷/채널/샘플레이트 변환)
// 출력 버퍼는 1개를 재사용: 다음 convert 전에 반드시 복사해 가야 함

use ffmpeg_next as ffmpeg;

use crate::audio::params::AudioParams;

/// 초기화 상태 (실패 원인 구분용)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResamplerInitState {
    Ok,
    NoInit,
    /// SwrContext 구성/초기화 실패
    InitFails,
    /// 출력 버퍼 크기 계산이 0으로 떨어짐 (파라미터 불량)
    OutputAllocFails,
}

/// 리샘플 스테이지
/// convert 호출 형태는 두 가지: packed 단일 버퍼 / planar 좌우 버퍼
pub struct AudioResampler {
    input_params: AudioParams,
    max_in_samples: usize,
    output_params: AudioParams,
    max_out_samples: usize,
    ctx: Option<ffmpeg::software::resampling::Context>,
    /// 단일 재사용 출력 버퍼 (매 convert마다 덮어씀)
    out_buf: Vec<u8>,
    num_converted: usize,
    init_state: ResamplerInitState,
}

impl AudioResampler {
    pub fn new(
        input_params: AudioParams,
        max_in_samples: usize,
        output_params: AudioParams,
    ) -> Self {
        Self {
            input_params,
            max_in_samples,
            output_params,
            max_out_samples: 0,
            ctx: None,
            out_buf: Vec::new(),
            num_converted: 0,
            init_state: ResamplerInitState::NoInit,
        }
    }

    /// 변환 컨텍스트 구성 + 최대 출력 샘플 수 계산 + 출력 버퍼 선할당
    /// 이미 초기화됐으면 이전 상태를 그대로 반환
    pub fn initialize(&mut self) -> ResamplerInitState {
        if self.init_state != ResamplerInitState::NoInit {
            return self.init_state;
        }

        let in_layout = default_layout(self.input_params.channel_count);
        let out_layout = default_layout(self.output_params.channel_count);

        let ctx = match ffmpeg::software::resampling::Context::get(
            self.input_params.sample_format,
            in_layout,
            self.input_params.sample_rate,
            self.output_params.sample_format,
            out_layout,
            self.output_params.sample_rate,
        ) {
            Ok(ctx) => ctx,
            Err(_) => {
                self.init_state = ResamplerInitState::InitFails;
                return self.init_state;
            }
        };

        // swr_get_out_samples 상당의 상한: 레이트 비율 올림 + 필터 지연 여유분
        let max_out = if self.input_params.sample_rate > 0 {
            let in_rate = self.input_params.sample_rate as u64;
            let out_rate = self.output_params.sample_rate as u64;
            ((self.max_in_samples as u64 * out_rate + in_rate - 1) / in_rate) as usize + 256
        } else {
            0
        };

        if max_out == 0 {
            self.init_state = ResamplerInitState::OutputAllocFails;
            return self.init_state;
        }

        self.max_out_samples = max_out;
        self.out_buf = vec![0u8; max_out * self.output_params.frame_width()];
        self.ctx = Some(ctx);
        self.init_state = ResamplerInitState::Ok;
        self.init_state
    }

    pub fn init_state(&self) -> ResamplerInitState {
        self.init_state
    }

    /// packed(인터리브) 입력 n샘플 변환, 산출 샘플 수 반환
    /// 실패 상태면 0
    pub fn convert_packed(&mut self, data: &[u8], n: usize) -> usize {
        if !self.ensure_initialized() || n == 0 {
            return 0;
        }

        let n = n.min(self.max_in_samples);
        let mut input = ffmpeg::frame::Audio::new(
            self.input_params.sample_format,
            n,
            default_layout(self.input_params.channel_count),
        );
        input.set_rate(self.input_params.sample_rate);

        let byte_count = (n * self.input_params.frame_width()).min(data.len());
        input.data_mut(0)[..byte_count].copy_from_slice(&data[..byte_count]);

        self.run_into_out_buf(Some(&input))
    }

    /// planar 채널별 입력 n샘플 변환 (모노는 left만 사용), 산출 샘플 수 반환
    pub fn convert_planar(&mut self, left: &[u8], right: &[u8], n: usize) -> usize {
        if !self.ensure_initialized() || n == 0 {
            return 0;
        }

        let n = n.min(self.max_in_samples);
        let mut input = ffmpeg::frame::Audio::new(
            self.input_params.sample_format,
            n,
            default_layout(self.input_params.channel_count),
        );
        input.set_rate(self.input_params.sample_rate);

        let plane_bytes = (n * self.input_params.bytes_per_sample).min(left.len());
        input.data_mut(0)[..plane_bytes].copy_from_slice(&left[..plane_bytes]);
        // packed 포맷으로 구성된 경우 평면이 1개뿐이므로 left만 쓰인다
        if self.input_params.channel_count >= 2 && self.input_params.is_planar() {
            let plane_bytes = (n * self.input_params.bytes_per_sample).min(right.len());
            input.data_mut(1)[..plane_bytes].copy_from_slice(&right[..plane_bytes]);
        }

        self.run_into_out_buf(Some(&input))
    }

    /// 내부 지연 라인 배출, 산출 샘플 수 반환
    pub fn flush(&mut self) -> usize {
        if !self.ensure_initialized() {
            return 0;
        }
        self.run_into_out_buf(None)
    }

    /// 직전 convert/flush 결과 (다음 호출 시 덮어써짐)
    pub fn output(&self) -> &[u8] {
        &self.out_buf[..self.num_converted * self.output_params.frame_width()]
    }

    /// 직전 호출이 산출한 샘플 수
    pub fn num_converted(&self) -> usize {
        self.num_converted
    }

    fn ensure_initialized(&mut self) -> bool {
        if self.init_state == ResamplerInitState::NoInit {
            self.initialize();
        }
        self.init_state == ResamplerInitState::Ok
    }

    /// 변환 실행 후 출력 프레임 → 재사용 버퍼 복사
    /// input이 None이면 flush
    fn run_into_out_buf(&mut self, input: Option<&ffmpeg::frame::Audio>) -> usize {
        let ctx = match self.ctx.as_mut() {
            Some(ctx) => ctx,
            None => return 0,
        };

        let mut output = ffmpeg::frame::Audio::new(
            self.output_params.sample_format,
            self.max_out_samples,
            default_layout(self.output_params.channel_count),
        );
        output.set_rate(self.output_params.sample_rate);

        let result = match input {
            Some(frame) => ctx.run(frame, &mut output),
            None => ctx.flush(&mut output),
        };
        if result.is_err() {
            self.num_converted = 0;
            return 0;
        }

        let produced = output.samples();
        let byte_count = produced * self.output_params.frame_width();
        if byte_count > 0 && output.data(0).len() >= byte_count {
            self.out_buf[..byte_count].copy_from_slice(&output.data(0)[..byte_count]);
        }

        self.num_converted = produced;
        produced
    }
}

/// 채널 수 → 기본 채널 레이아웃 (지원 범위는 모노/스테레오뿐)
fn default_layout(channel_count: u16) -> ffmpeg::ChannelLayout {
    if channel_count >= 2 {
        ffmpeg::ChannelLayout::STEREO
    } else {
        ffmpeg::ChannelLayout::MONO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ffmpeg_next as ffmpeg;
    use ffmpeg::format::sample::Type;
    use ffmpeg::format::Sample;

    fn s16_params(channels: u16, rate: u32) -> AudioParams {
        AudioParams::new(channels, Sample::I16(Type::Packed), rate)
    }

    fn sine_s16_stereo_bytes(n: usize, rate: u32) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(n * 4);
        for i in 0..n {
            let t = i as f64 / rate as f64;
            let v = ((t * 440.0 * 2.0 * std::f64::consts::PI).sin() * 16000.0) as i16;
            bytes.extend_from_slice(&v.to_ne_bytes());
            bytes.extend_from_slice(&v.to_ne_bytes());
        }
        bytes
    }

    #[test]
    fn same_rate_conversion_conserves_sample_count() {
        crate::init_ffmpeg();
        let mut resampler = AudioResampler::new(s16_params(2, 44100), 44100, s16_params(2, 44100));
        assert_eq!(resampler.initialize(), ResamplerInitState::Ok);

        let input = sine_s16_stereo_bytes(1000, 44100);
        let produced = resampler.convert_packed(&input, 1000);
        let flushed = resampler.flush();
        assert_eq!(produced + flushed, 1000);
    }

    #[test]
    fn rate_conversion_total_matches_ratio_within_tolerance() {
        crate::init_ffmpeg();
        let mut resampler = AudioResampler::new(s16_params(2, 32000), 32000, s16_params(2, 44100));

        let input = sine_s16_stereo_bytes(32000, 32000);
        // 지연 라인 때문에 convert만으로는 부족하고 flush까지 합쳐야 전량이 나옴
        let mut total = resampler.convert_packed(&input, 32000);
        total += resampler.flush();

        let expected = 44100i64;
        assert!(
            (total as i64 - expected).abs() <= 32,
            "expected ~{} samples, got {}",
            expected,
            total
        );
    }

    #[test]
    fn lazy_initialize_on_first_convert() {
        crate::init_ffmpeg();
        let mut resampler = AudioResampler::new(s16_params(2, 44100), 44100, s16_params(2, 44100));
        assert_eq!(resampler.init_state(), ResamplerInitState::NoInit);

        let input = sine_s16_stereo_bytes(100, 44100);
        let produced = resampler.convert_packed(&input, 100);
        assert_eq!(resampler.init_state(), ResamplerInitState::Ok);
        assert_eq!(produced, 100);
    }

    #[test]
    fn failure_state_returns_zero() {
        crate::init_ffmpeg();
        // 샘플레이트 0 → 초기화 실패 → convert는 0을 반환
        let mut resampler = AudioResampler::new(s16_params(2, 0), 0, s16_params(2, 44100));
        let produced = resampler.convert_packed(&[0u8; 64], 16);
        assert_eq!(produced, 0);
        assert_ne!(resampler.init_state(), ResamplerInitState::Ok);
    }

    #[test]
    fn planar_input_shape_converts_to_packed_s16() {
        crate::init_ffmpeg();
        let input_params = AudioParams::new(2, Sample::F32(Type::Planar), 44100);
        let mut resampler = AudioResampler::new(input_params, 44100, s16_params(2, 44100));

        let n = 512;
        let left: Vec<u8> = std::iter::repeat(0.5f32.to_ne_bytes())
            .take(n)
            .flatten()
            .collect();
        let right: Vec<u8> = std::iter::repeat((-0.5f32).to_ne_bytes())
            .take(n)
            .flatten()
            .collect();

        let produced = resampler.convert_planar(&left, &right, n);
        assert_eq!(produced, n);

        let out = resampler.output();
        let l = i16::from_ne_bytes([out[0], out[1]]) as i32;
        let r = i16::from_ne_bytes([out[2], out[3]]) as i32;
        assert!((l - 16384).abs() <= 1, "left sample {}", l);
        assert!((r + 16384).abs() <= 1, "right sample {}", r);
    }
}
