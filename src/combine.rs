// Copyright 2026 SkyVision Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Weighted blending of a text vector with an optional image vector.

use crate::error::SearchError;
use crate::error::SearchResult;

const WEIGHT_EPSILON: f32 = 1e-9;

/// Weights after clamping to [0, 1] and normalizing by their sum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Weights {
    pub text: f32,
    pub image: f32,
}

impl Weights {
    pub fn normalize(weight_text: f32, weight_image: f32) -> Self {
        let wt = clamp_unit(weight_text);
        let wi = clamp_unit(weight_image);
        let sum = wt + wi;
        if sum <= WEIGHT_EPSILON {
            return Self {
                text: 1.0,
                image: 0.0,
            };
        }
        let denom = sum.max(WEIGHT_EPSILON);
        Self {
            text: wt / denom,
            image: wi / denom,
        }
    }
}

fn clamp_unit(weight: f32) -> f32 {
    if weight.is_nan() {
        0.0
    } else {
        weight.clamp(0.0, 1.0)
    }
}

/// Blends `text` and `image` as `wt * text + wi * image`. Without an image
/// vector the text vector is returned unchanged. The result is not rescaled
/// to unit length.
pub fn combine(
    text: Vec<f32>,
    image: Option<&[f32]>,
    weight_text: f32,
    weight_image: f32,
) -> SearchResult<Vec<f32>> {
    let Some(image) = image else {
        return Ok(text);
    };
    if image.len() != text.len() {
        return Err(SearchError::ShapeMismatch {
            text: text.len(),
            image: image.len(),
        });
    }
    let weights = Weights::normalize(weight_text, weight_image);
    Ok(text
        .iter()
        .zip(image)
        .map(|(t, i)| weights.text * t + weights.image * i)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: &[f32], b: &[f32]) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b) {
            assert!((x - y).abs() < 1e-6, "{a:?} != {b:?}");
        }
    }

    #[test]
    fn weights_sum_to_one() {
        let steps = [0.0f32, 0.1, 0.25, 0.4, 0.5, 0.6, 0.9, 1.0];
        for wt in steps {
            for wi in steps {
                if wt + wi == 0.0 {
                    continue;
                }
                let w = Weights::normalize(wt, wi);
                assert!((w.text + w.image - 1.0).abs() < 1e-6, "{wt} {wi}");
                assert!(w.text >= 0.0 && w.image >= 0.0);
            }
        }
    }

    #[test]
    fn weights_are_clamped_before_normalizing() {
        let w = Weights::normalize(3.0, -2.0);
        assert_eq!(w, Weights { text: 1.0, image: 0.0 });
        let w = Weights::normalize(f32::NAN, 0.5);
        assert_eq!(w, Weights { text: 0.0, image: 1.0 });
    }

    #[test]
    fn zero_weights_fall_back_to_text() {
        let w = Weights::normalize(0.0, 0.0);
        assert_eq!(w, Weights { text: 1.0, image: 0.0 });
        let out = combine(vec![1.0, 2.0], Some(&[5.0, 5.0][..]), 0.0, 0.0).expect("combine");
        assert_close(&out, &[1.0, 2.0]);
    }

    #[test]
    fn blends_with_given_weights() {
        let text = vec![1.0, 0.0, 0.5];
        let image = [0.0, 1.0, 0.5];
        let out = combine(text, Some(&image[..]), 0.6, 0.4).expect("combine");
        assert_close(&out, &[0.6, 0.4, 0.5]);
    }

    #[test]
    fn unequal_weights_are_renormalized() {
        let out = combine(vec![1.0], Some(&[0.0][..]), 0.3, 0.3).expect("combine");
        assert_close(&out, &[0.5]);
    }

    #[test]
    fn text_only_returns_input_unchanged() {
        let text = vec![3.0, 4.0];
        let out = combine(text.clone(), None, 0.1, 0.9).expect("combine");
        assert_eq!(out, text);
    }

    #[test]
    fn shape_mismatch_is_rejected() {
        let err = combine(vec![1.0, 2.0, 3.0], Some(&[1.0, 2.0][..]), 0.5, 0.5).unwrap_err();
        assert!(err.is_validation());
        assert!(matches!(err, SearchError::ShapeMismatch { text: 3, image: 2 }));
    }
}
