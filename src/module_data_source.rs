pub mod data_source {
    extern crate ndarray;
    use ndarray::Array2;

    use crate::module_error::error::{ForestError, Result};

    // Column-major read access to a table of observations.
    // Numeric attributes are indexed `0..numeric_attribute_count()` and text
    // attributes `0..text_attribute_count()`, each in its own index space.
    // A missing numeric reading is `f64::NAN`.
    pub trait DataSource {
        fn numeric_value(&self, attribute: usize, observation: usize) -> f64;
        fn text_value(&self, attribute: usize, observation: usize) -> &[u8];
        fn numeric_attribute_count(&self) -> usize;
        fn text_attribute_count(&self) -> usize;
        fn observation_count(&self) -> usize;

        // Numeric plus text attributes, the range split attributes are drawn from.
        fn attribute_count(&self) -> usize {
            self.numeric_attribute_count() + self.text_attribute_count()
        }
    }

    // In-memory table.
    // Both arrays are laid out attribute x observation.
    #[derive(Debug, Clone)]
    pub struct ColumnarData {
        numeric: Array2<f64>,
        text: Array2<Vec<u8>>,
    }

    impl ColumnarData {
        pub fn new(numeric: Array2<f64>, text: Array2<Vec<u8>>) -> Result<Self> {
            if numeric.ncols() != text.ncols() {
                return Err(ForestError::ShapeMismatch {
                    numeric: numeric.ncols(),
                    text: text.ncols(),
                });
            }
            Ok(ColumnarData { numeric, text })
        }

        // Numeric attributes only.
        pub fn from_numeric(numeric: Array2<f64>) -> Self {
            let n_obs = numeric.ncols();
            ColumnarData {
                numeric,
                text: Array2::default((0, n_obs)),
            }
        }

        // Text attributes only.
        pub fn from_text(text: Array2<Vec<u8>>) -> Self {
            let n_obs = text.ncols();
            ColumnarData {
                numeric: Array2::zeros((0, n_obs)),
                text,
            }
        }

        // Build from a matrix with one observation per row, one attribute per column.
        pub fn from_observation_rows(x: &Array2<f64>) -> Self {
            Self::from_numeric(x.t().to_owned())
        }

        // Attach text columns given as one `Vec` of strings per attribute.
        pub fn with_text_columns<S: AsRef<str>>(self, columns: &[Vec<S>]) -> Result<Self> {
            let n_obs = self.numeric.ncols();
            if let Some(bad) = columns.iter().find(|c| c.len() != n_obs) {
                return Err(ForestError::ShapeMismatch {
                    numeric: n_obs,
                    text: bad.len(),
                });
            }
            let text = Array2::from_shape_fn((columns.len(), n_obs), |(a, i)| {
                columns[a][i].as_ref().as_bytes().to_vec()
            });
            Self::new(self.numeric, text)
        }
    }

    impl DataSource for ColumnarData {
        fn numeric_value(&self, attribute: usize, observation: usize) -> f64 {
            self.numeric[[attribute, observation]]
        }

        fn text_value(&self, attribute: usize, observation: usize) -> &[u8] {
            &self.text[[attribute, observation]]
        }

        fn numeric_attribute_count(&self) -> usize {
            self.numeric.nrows()
        }

        fn text_attribute_count(&self) -> usize {
            self.text.nrows()
        }

        fn observation_count(&self) -> usize {
            self.numeric.ncols()
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use ndarray::array;

        #[test]
        fn rows_are_transposed_to_columns() {
            let x = array![[1.0, 10.0], [2.0, 20.0], [3.0, 30.0]];
            let data = ColumnarData::from_observation_rows(&x);

            assert_eq!(data.observation_count(), 3);
            assert_eq!(data.numeric_attribute_count(), 2);
            assert_eq!(data.text_attribute_count(), 0);
            assert_eq!(data.numeric_value(1, 2), 30.0);
        }

        #[test]
        fn text_columns_are_attached() {
            let x = array![[1.0], [2.0]];
            let data = ColumnarData::from_observation_rows(&x)
                .with_text_columns(&[vec!["ab", "xyz"]])
                .unwrap();

            assert_eq!(data.attribute_count(), 2);
            assert_eq!(data.text_value(0, 1), b"xyz");
        }

        #[test]
        fn mismatched_observation_counts_are_rejected() {
            let numeric = Array2::<f64>::zeros((1, 3));
            let text = Array2::<Vec<u8>>::default((1, 2));
            assert_eq!(
                ColumnarData::new(numeric, text).unwrap_err(),
                ForestError::ShapeMismatch { numeric: 3, text: 2 }
            );

            let x = array![[1.0], [2.0]];
            let res = ColumnarData::from_observation_rows(&x).with_text_columns(&[vec!["a"]]);
            assert!(matches!(res, Err(ForestError::ShapeMismatch { .. })));
        }
    }
}
