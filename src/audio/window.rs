// 리샘플 윈도우 - 가변 길이 디코드 청크를 고정 크기 변환 호출로 잇는 버퍼
// 용량 = 입력 샘플레이트 1초 분량, 내용은 항상 packed(인터리브) 레이아웃

/// 디코드 청크의 메모리 레이아웃
/// 원본 포맷별 복사 분기를 하나의 전략 선택으로 통합
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkLayout {
    /// 채널이 샘플 단위로 섞여 있는 단일 평면
    Packed,
    /// planar 모노 (평면 1개 = packed 모노와 동일 배치)
    PlanarMono,
    /// planar 스테레오 (좌/우 평면 분리, 복사 시 인터리브)
    PlanarStereo,
}

/// 디코드 콜백 1회 분량의 샘플 뷰
/// 프레임 버퍼를 빌려오므로 콜백 동안만 유효
pub struct DecodedChunk<'a> {
    pub layout: ChunkLayout,
    pub planes: [&'a [u8]; 2],
    pub samples: usize,
}

/// 고정 용량 누적 버퍼
/// fill은 구조상 capacity를 넘을 수 없음 (push가 남은 공간만큼만 복사)
pub struct ResampleWindow {
    buf: Vec<u8>,
    capacity: usize,
    fill: usize,
    channel_count: usize,
    bytes_per_sample: usize,
}

impl ResampleWindow {
    pub fn new(capacity_samples: usize, channel_count: u16, bytes_per_sample: usize) -> Self {
        let frame_width = channel_count as usize * bytes_per_sample;
        Self {
            buf: vec![0u8; capacity_samples * frame_width],
            capacity: capacity_samples,
            fill: 0,
            channel_count: channel_count as usize,
            bytes_per_sample,
        }
    }

    /// 청크의 `offset` 샘플부터 남은 공간만큼 복사, 복사한 샘플 수 반환
    /// planar 입력은 복사하면서 packed로 인터리브
    pub fn push(&mut self, chunk: &DecodedChunk, offset: usize) -> usize {
        let remaining = chunk.samples.saturating_sub(offset);
        let num_to_copy = remaining.min(self.capacity - self.fill);
        if num_to_copy == 0 {
            return 0;
        }

        let bps = self.bytes_per_sample;
        let frame_width = self.channel_count * bps;
        let dst_start = self.fill * frame_width;

        match chunk.layout {
            ChunkLayout::Packed => {
                let src_start = offset * frame_width;
                let n = num_to_copy * frame_width;
                self.buf[dst_start..dst_start + n]
                    .copy_from_slice(&chunk.planes[0][src_start..src_start + n]);
            }
            ChunkLayout::PlanarMono => {
                let src_start = offset * bps;
                let n = num_to_copy * bps;
                self.buf[dst_start..dst_start + n]
                    .copy_from_slice(&chunk.planes[0][src_start..src_start + n]);
            }
            ChunkLayout::PlanarStereo => {
                for i in 0..num_to_copy {
                    let src = (offset + i) * bps;
                    let dst = dst_start + i * frame_width;
                    self.buf[dst..dst + bps]
                        .copy_from_slice(&chunk.planes[0][src..src + bps]);
                    self.buf[dst + bps..dst + 2 * bps]
                        .copy_from_slice(&chunk.planes[1][src..src + bps]);
                }
            }
        }

        self.fill += num_to_copy;
        num_to_copy
    }

    pub fn is_full(&self) -> bool {
        self.fill == self.capacity
    }

    /// 현재 누적된 샘플 수
    pub fn len(&self) -> usize {
        self.fill
    }

    pub fn is_empty(&self) -> bool {
        self.fill == 0
    }

    /// 용량 (샘플 수)
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 버퍼 전체 (용량만큼)
    /// 마지막 flush의 priming 보정은 fill 너머 영역을 읽을 수 있으므로 전체를 노출
    pub fn data(&self) -> &[u8] {
        &self.buf
    }

    pub fn reset(&mut self) {
        self.fill = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packed_chunk(data: &[u8], samples: usize) -> DecodedChunk {
        DecodedChunk {
            layout: ChunkLayout::Packed,
            planes: [data, &[]],
            samples,
        }
    }

    #[test]
    fn fills_up_to_capacity_and_reports_remainder() {
        // 용량 4샘플, 스테레오 16-bit (frame_width = 4바이트)
        let mut window = ResampleWindow::new(4, 2, 2);
        let data = vec![1u8; 6 * 4];
        let chunk = packed_chunk(&data, 6);

        let copied = window.push(&chunk, 0);
        assert_eq!(copied, 4);
        assert!(window.is_full());
        assert_eq!(window.len(), 4);

        // 변환 후 남은 2샘플을 이어서 소비
        window.reset();
        let copied = window.push(&chunk, copied);
        assert_eq!(copied, 2);
        assert_eq!(window.len(), 2);
        assert!(!window.is_full());
    }

    #[test]
    fn fill_never_exceeds_capacity() {
        let mut window = ResampleWindow::new(8, 1, 2);
        let data = vec![0u8; 32 * 2];
        let chunk = packed_chunk(&data, 32);

        let mut consumed = 0;
        while consumed < chunk.samples {
            let copied = window.push(&chunk, consumed);
            assert!(window.len() <= window.capacity());
            consumed += copied;
            if window.is_full() {
                window.reset();
            }
        }
        assert_eq!(consumed, 32);
    }

    #[test]
    fn oversized_chunk_is_consumed_without_loss() {
        // 윈도우보다 큰 청크: push/reset 루프로 전량 소비되는지 (보존 불변식)
        let mut window = ResampleWindow::new(4, 2, 2);
        let data: Vec<u8> = (0..11 * 4).map(|i| i as u8).collect();
        let chunk = packed_chunk(&data, 11);

        let mut consumed = 0;
        let mut full_windows = 0;
        while consumed < chunk.samples {
            consumed += window.push(&chunk, consumed);
            if window.is_full() {
                full_windows += 1;
                window.reset();
            }
        }
        assert_eq!(consumed, 11);
        assert_eq!(full_windows, 2);
        assert_eq!(window.len(), 3);
    }

    #[test]
    fn planar_stereo_is_interleaved() {
        let mut window = ResampleWindow::new(4, 2, 2);
        // 좌 = [1,1],[2,2], 우 = [9,9],[8,8] (16-bit 샘플 2개씩)
        let left = [1u8, 1, 2, 2];
        let right = [9u8, 9, 8, 8];
        let chunk = DecodedChunk {
            layout: ChunkLayout::PlanarStereo,
            planes: [&left, &right],
            samples: 2,
        };

        let copied = window.push(&chunk, 0);
        assert_eq!(copied, 2);
        // L0 R0 L1 R1 순서로 인터리브됨
        assert_eq!(&window.data()[..8], &[1, 1, 9, 9, 2, 2, 8, 8]);
    }

    #[test]
    fn planar_mono_copies_single_plane() {
        let mut window = ResampleWindow::new(4, 1, 2);
        let plane = [5u8, 5, 6, 6, 7, 7];
        let chunk = DecodedChunk {
            layout: ChunkLayout::PlanarMono,
            planes: [&plane, &[]],
            samples: 3,
        };

        assert_eq!(window.push(&chunk, 0), 3);
        assert_eq!(&window.data()[..6], &plane);
    }
}
