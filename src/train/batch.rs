//! Training batches

use crate::error::{Error, Result};
use ndarray::{Array2, Axis};

/// Supervision targets for a batch
#[derive(Debug, Clone, PartialEq)]
pub enum Targets {
    /// One class index per sample
    Classes(Vec<usize>),
    /// `[batch, num_classes]` indicator matrix for multi-label data
    MultiHot(Array2<f32>),
}

impl Targets {
    pub fn len(&self) -> usize {
        match self {
            Targets::Classes(classes) => classes.len(),
            Targets::MultiHot(labels) => labels.nrows(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reorder samples by `index`
    pub fn select(&self, index: &[usize]) -> Self {
        match self {
            Targets::Classes(classes) => {
                Targets::Classes(index.iter().map(|&i| classes[i]).collect())
            }
            Targets::MultiHot(labels) => Targets::MultiHot(labels.select(Axis(0), index)),
        }
    }

    /// Dense `[batch, num_classes]` indicator matrix
    pub fn to_dense(&self, num_classes: usize) -> Result<Array2<f32>> {
        match self {
            Targets::Classes(classes) => {
                let mut dense = Array2::zeros((classes.len(), num_classes));
                for (index, &class) in classes.iter().enumerate() {
                    if class >= num_classes {
                        return Err(Error::InvalidTarget {
                            index,
                            class,
                            num_classes,
                        });
                    }
                    dense[[index, class]] = 1.0;
                }
                Ok(dense)
            }
            Targets::MultiHot(labels) => {
                if labels.ncols() != num_classes {
                    return Err(Error::ShapeMismatch {
                        expected: vec![labels.nrows(), num_classes],
                        got: labels.shape().to_vec(),
                    });
                }
                Ok(labels.clone())
            }
        }
    }
}

/// A batch of images, one flattened image per row, with its targets
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub images: Array2<f32>,
    pub targets: Targets,
}

impl Batch {
    /// Create a batch, checking that images and targets agree on batch size
    pub fn new(images: Array2<f32>, targets: Targets) -> Result<Self> {
        if images.nrows() != targets.len() {
            return Err(Error::ShapeMismatch {
                expected: vec![images.nrows()],
                got: vec![targets.len()],
            });
        }
        Ok(Self { images, targets })
    }

    pub fn len(&self) -> usize {
        self.images.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_batch_size_mismatch() {
        let images = Array2::zeros((3, 4));
        let err = Batch::new(images, Targets::Classes(vec![0, 1])).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
    }

    #[test]
    fn test_select_reorders_targets() {
        let classes = Targets::Classes(vec![4, 5, 6]);
        assert_eq!(classes.select(&[2, 0, 1]), Targets::Classes(vec![6, 4, 5]));

        let multi = Targets::MultiHot(array![[1.0, 0.0], [0.0, 1.0]]);
        assert_eq!(
            multi.select(&[1, 0]),
            Targets::MultiHot(array![[0.0, 1.0], [1.0, 0.0]])
        );
    }

    #[test]
    fn test_to_dense_one_hot() {
        let dense = Targets::Classes(vec![2, 0]).to_dense(3).unwrap();
        assert_eq!(dense, array![[0.0, 0.0, 1.0], [1.0, 0.0, 0.0]]);
    }

    #[test]
    fn test_to_dense_rejects_out_of_range_class() {
        let err = Targets::Classes(vec![0, 7]).to_dense(3).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidTarget {
                index: 1,
                class: 7,
                num_classes: 3
            }
        ));
    }
}
