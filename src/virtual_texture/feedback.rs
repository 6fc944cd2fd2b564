use crate::virtual_texture::PageRequest;
use async_channel::{Receiver, Sender, TryRecvError};
use bevy::prelude::*;
use itertools::Itertools;

/// The downscale factor of the feedback target relative to the view.
pub const FEEDBACK_DOWNSCALE: u32 = 8;

/// The size of the feedback target of a view.
pub fn feedback_size(view_size: UVec2) -> UVec2 {
    (view_size / FEEDBACK_DOWNSCALE).max(UVec2::ONE)
}

/// Decodes the RGBA8 texels of the feedback target into page requests.
///
/// Each texel stores `(page x, page y, mip, unused)`.
/// Duplicates are collapsed, the order of the first occurrences is kept.
pub fn decode_feedback(data: &[u8]) -> Vec<PageRequest> {
    data.chunks_exact(4)
        .map(|texel| PageRequest::new(texel[0] as u32, texel[1] as u32, texel[2] as u32))
        .unique()
        .collect()
}

enum ReadbackState {
    Idle,
    InFlight(Receiver<Vec<u8>>),
}

/// Reads the feedback target back to the CPU, with at most one readback in flight.
///
/// [`Self::begin_readback`] hands out the sending half of a single slot channel, which
/// the render side fills once the GPU copy has been mapped.
/// [`Self::poll`] takes the data once it arrived and allows the next readback.
pub struct FeedbackReader {
    state: ReadbackState,
}

impl Default for FeedbackReader {
    fn default() -> Self {
        Self {
            state: ReadbackState::Idle,
        }
    }
}

impl FeedbackReader {
    pub fn is_in_flight(&self) -> bool {
        matches!(self.state, ReadbackState::InFlight(_))
    }

    /// Starts a new readback, unless one is still in flight.
    pub fn begin_readback(&mut self) -> Option<Sender<Vec<u8>>> {
        if self.is_in_flight() {
            return None;
        }

        let (sender, receiver) = async_channel::bounded(1);
        self.state = ReadbackState::InFlight(receiver);

        Some(sender)
    }

    /// Returns the data of the finished readback.
    ///
    /// A readback whose sender was dropped without data is abandoned, so that the
    /// next one can start.
    pub fn poll(&mut self) -> Option<Vec<u8>> {
        let ReadbackState::InFlight(receiver) = &self.state else {
            return None;
        };

        match receiver.try_recv() {
            Ok(data) => {
                self.state = ReadbackState::Idle;
                Some(data)
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => {
                warn!("The feedback readback was dropped without data.");
                self.state = ReadbackState::Idle;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_collapses_duplicates() {
        let data = [
            1, 2, 0, 255, //
            3, 4, 1, 255, //
            1, 2, 0, 0, //
            1, 2, 1, 0, //
        ];

        assert_eq!(
            decode_feedback(&data),
            vec![
                PageRequest::new(1, 2, 0),
                PageRequest::new(3, 4, 1),
                PageRequest::new(1, 2, 1),
            ]
        );
    }

    #[test]
    fn decode_ignores_partial_texels() {
        assert_eq!(decode_feedback(&[9, 9, 9]), vec![]);
    }

    #[test]
    fn one_readback_at_a_time() {
        let mut reader = FeedbackReader::default();

        let sender = reader.begin_readback().unwrap();
        assert!(reader.is_in_flight());
        assert!(reader.begin_readback().is_none());
        assert_eq!(reader.poll(), None);

        sender.try_send(vec![1, 2, 3, 4]).unwrap();

        assert_eq!(reader.poll(), Some(vec![1, 2, 3, 4]));
        assert!(!reader.is_in_flight());
        assert_eq!(reader.poll(), None);
        assert!(reader.begin_readback().is_some());
    }

    #[test]
    fn dropped_readback_frees_the_slot() {
        let mut reader = FeedbackReader::default();

        drop(reader.begin_readback());

        assert_eq!(reader.poll(), None);
        assert!(!reader.is_in_flight());
    }

    #[test]
    fn feedback_target_size() {
        assert_eq!(feedback_size(UVec2::new(1920, 1080)), UVec2::new(240, 135));
        assert_eq!(feedback_size(UVec2::new(4, 4)), UVec2::ONE);
    }
}
