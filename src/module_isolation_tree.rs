pub mod isolation_tree {
    extern crate rand;
    use rand::Rng;
    use rand_distr::{Distribution, Uniform};

    extern crate statrs;
    use statrs::consts::EULER_MASCHERONI;

    use std::cmp::Ordering;

    use crate::module_data_source::data_source::DataSource;
    use crate::module_error::error::{ForestError, Result};

    // Node data setting
    // Nodes are enums for the recursive processing: splits in the middle,
    // leaves at the end. A split on a numeric attribute carries a number,
    // a split on a text attribute carries a byte string.
    #[derive(Debug, Clone, PartialEq)]
    pub enum IsolationNode {
        NumericSplit {
            left: Box<IsolationNode>,  // Missing values and values <= pivot
            right: Box<IsolationNode>, // Values above the pivot
            attribute: usize,          // Numeric attribute index
            pivot: f64,                // May be NaN
            size: usize,
        },
        TextSplit {
            left: Box<IsolationNode>,
            right: Box<IsolationNode>,
            attribute: usize, // Combined index, numeric attributes first
            pivot: Vec<u8>,
            size: usize,
        },
        // Only the number of observations that reached the leaf is kept,
        // never the data.
        Leaf {
            size: usize,
        },
    }

    impl IsolationNode {
        fn new_leaf(size: usize) -> Box<IsolationNode> {
            Box::new(IsolationNode::Leaf { size })
        }

        fn new_numeric_split(
            left: Box<IsolationNode>,
            right: Box<IsolationNode>,
            attribute: usize,
            pivot: f64,
            size: usize,
        ) -> Box<IsolationNode> {
            Box::new(IsolationNode::NumericSplit {
                left,
                right,
                attribute,
                pivot,
                size,
            })
        }

        fn new_text_split(
            left: Box<IsolationNode>,
            right: Box<IsolationNode>,
            attribute: usize,
            pivot: Vec<u8>,
            size: usize,
        ) -> Box<IsolationNode> {
            Box::new(IsolationNode::TextSplit {
                left,
                right,
                attribute,
                pivot,
                size,
            })
        }

        // Number of sample observations that reached this node while growing.
        pub fn size(&self) -> usize {
            match self {
                IsolationNode::NumericSplit { size, .. }
                | IsolationNode::TextSplit { size, .. }
                | IsolationNode::Leaf { size } => *size,
            }
        }

        pub fn is_leaf(&self) -> bool {
            matches!(self, IsolationNode::Leaf { .. })
        }

        fn children(&self) -> Option<(&IsolationNode, &IsolationNode)> {
            match self {
                IsolationNode::NumericSplit { left, right, .. }
                | IsolationNode::TextSplit { left, right, .. } => Some((&**left, &**right)),
                IsolationNode::Leaf { .. } => None,
            }
        }

        // Pick the child an observation is routed to.
        // Panics if called on a leaf.
        fn route<D: DataSource + ?Sized>(&self, data: &D, observation: usize) -> &IsolationNode {
            let n_num = data.numeric_attribute_count();
            let (goes_left, left, right) = match self {
                IsolationNode::NumericSplit {
                    left,
                    right,
                    attribute,
                    pivot,
                    ..
                } => (
                    numeric_goes_left(data.numeric_value(*attribute, observation), *pivot),
                    left,
                    right,
                ),
                IsolationNode::TextSplit {
                    left,
                    right,
                    attribute,
                    pivot,
                    ..
                } => (
                    text_goes_left(data.text_value(*attribute - n_num, observation), pivot),
                    left,
                    right,
                ),
                IsolationNode::Leaf { .. } => unreachable!("leaves have no children"),
            };
            if goes_left {
                &**left
            } else {
                &**right
            }
        }
    }

    // Numeric routing rule. NaN is smaller than any value: with a NaN pivot
    // only NaN goes left, otherwise NaN or anything `<= pivot` goes left.
    pub fn numeric_goes_left(value: f64, pivot: f64) -> bool {
        if pivot.is_nan() {
            value.is_nan()
        } else {
            value.is_nan() || value <= pivot
        }
    }

    // Text routing rule. Shorter strings go left, longer go right and
    // equal lengths compare byte by byte.
    pub fn text_goes_left(value: &[u8], pivot: &[u8]) -> bool {
        match value.len().cmp(&pivot.len()) {
            Ordering::Less => true,
            Ordering::Greater => false,
            Ordering::Equal => value <= pivot,
        }
    }

    // Expected path length `c(n)` of an unsuccessful search in a binary
    // search tree of `n` points, used to normalize path lengths and to
    // correct leaves that stopped growing before isolating their points.
    // Zero for `n <= 1`.
    pub fn average_path_length(n: usize) -> f64 {
        if n > 1 {
            let nf = n as f64;
            2. * ((nf - 1.).ln() + EULER_MASCHERONI) - (2. * (nf - 1.)) / nf
        } else {
            0.
        }
    }

    // One tree of the Isolation forest
    #[derive(Debug, Clone, PartialEq)]
    pub struct IsolationTree {
        root: Box<IsolationNode>,
    }

    // Recursion state while growing one tree.
    struct TreeGrower<'a, D: ?Sized, R: ?Sized> {
        data: &'a D,
        rng: &'a mut R,
        attributes: Option<Uniform<usize>>,
        n_num: usize,
        height_limit: u32,
    }

    impl<'a, D: DataSource + ?Sized, R: Rng + ?Sized> TreeGrower<'a, D, R> {
        fn grow_node(&mut self, sample: Vec<usize>, height: u32) -> Box<IsolationNode> {
            let size = sample.len();

            // When data is isolated or at the specified depth, return the leaf.
            if size <= 1 || height >= self.height_limit {
                return IsolationNode::new_leaf(size);
            }

            // Checked in `IsolationTree::grow` before the first split.
            let attributes = match self.attributes {
                Some(attributes) => attributes,
                None => unreachable!("split requested without attributes"),
            };
            let attribute = attributes.sample(&mut *self.rng);
            let pick = sample[self.rng.gen_range(0..size)];

            let mut left = Vec::with_capacity(size);
            let mut right = Vec::with_capacity(size);

            if attribute < self.n_num {
                let pivot = self.data.numeric_value(attribute, pick);
                for &i in sample.iter() {
                    if numeric_goes_left(self.data.numeric_value(attribute, i), pivot) {
                        left.push(i);
                    } else {
                        right.push(i);
                    }
                }
                drop(sample);

                let left_node = self.grow_node(left, height + 1);
                let right_node = self.grow_node(right, height + 1);
                IsolationNode::new_numeric_split(left_node, right_node, attribute, pivot, size)
            } else {
                let text_attribute = attribute - self.n_num;
                let pivot = self.data.text_value(text_attribute, pick).to_vec();
                for &i in sample.iter() {
                    if text_goes_left(self.data.text_value(text_attribute, i), &pivot) {
                        left.push(i);
                    } else {
                        right.push(i);
                    }
                }
                drop(sample);

                let left_node = self.grow_node(left, height + 1);
                let right_node = self.grow_node(right, height + 1);
                IsolationNode::new_text_split(left_node, right_node, attribute, pivot, size)
            }
        }
    }

    impl IsolationTree {
        // Grow a tree from `sample` (observation indices into `data`) by
        // recursive random splitting, stopping at `height_limit`.
        // Each split draws one attribute uniformly over all numeric and text
        // attributes, then draws one member of the current sample whose value
        // becomes the pivot.
        pub fn grow<D, R>(data: &D, sample: Vec<usize>, height_limit: u32, rng: &mut R) -> Result<Self>
        where
            D: DataSource + ?Sized,
            R: Rng + ?Sized,
        {
            let observation_count = data.observation_count();
            if let Some(&observation) = sample.iter().find(|&&i| i >= observation_count) {
                return Err(ForestError::ObservationOutOfRange {
                    observation,
                    observation_count,
                });
            }

            let attribute_count = data.attribute_count();
            if attribute_count == 0 && sample.len() > 1 && height_limit > 0 {
                return Err(ForestError::InvalidConfiguration(
                    "cannot split a sample without any attributes".to_string(),
                ));
            }

            let mut grower = TreeGrower {
                data,
                rng,
                attributes: (attribute_count > 0).then(|| Uniform::from(0..attribute_count)),
                n_num: data.numeric_attribute_count(),
                height_limit,
            };
            let root = grower.grow_node(sample, 0);
            Ok(IsolationTree { root })
        }

        pub fn root(&self) -> &IsolationNode {
            &self.root
        }

        // Depth of the leaf `observation` falls into, plus `c(size)` when
        // that leaf still holds more than one observation.
        pub fn path_length<D: DataSource + ?Sized>(&self, data: &D, observation: usize) -> f64 {
            let mut node: &IsolationNode = &self.root;
            let mut depth: usize = 0;
            while !node.is_leaf() {
                node = node.route(data, observation);
                depth += 1;
            }
            depth as f64 + average_path_length(node.size())
        }

        // Deepest leaf.
        pub fn depth(&self) -> usize {
            fn walk(node: &IsolationNode) -> usize {
                match node.children() {
                    Some((l, r)) => 1 + walk(l).max(walk(r)),
                    None => 0,
                }
            }
            walk(&self.root)
        }

        pub fn node_count(&self) -> usize {
            fn walk(node: &IsolationNode) -> usize {
                match node.children() {
                    Some((l, r)) => 1 + walk(l) + walk(r),
                    None => 1,
                }
            }
            walk(&self.root)
        }

        pub fn leaf_count(&self) -> usize {
            fn walk(node: &IsolationNode) -> usize {
                match node.children() {
                    Some((l, r)) => walk(l) + walk(r),
                    None => 1,
                }
            }
            walk(&self.root)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::module_data_source::data_source::ColumnarData;
        use ndarray::{array, Array, Array2};
        use ndarray_rand::rand_distr::Normal;
        use ndarray_rand::RandomExt;
        use rand::SeedableRng;
        use rand_chacha::ChaCha8Rng;

        #[test]
        fn average_path_length_of_two() {
            let expected = 2. * EULER_MASCHERONI - 1.;
            assert!((average_path_length(2) - expected).abs() < 1e-12);
            assert!((average_path_length(2) - 0.1544).abs() < 1e-4);
        }

        #[test]
        fn average_path_length_positive_and_increasing() {
            let mut prev = 0.;
            for n in 2..2000 {
                let c = average_path_length(n);
                assert!(c > 0.);
                assert!(c > prev, "c({}) = {} is not above {}", n, c, prev);
                prev = c;
            }
            assert_eq!(average_path_length(1), 0.);
            assert_eq!(average_path_length(0), 0.);
        }

        #[test]
        fn numeric_routing_with_missing_values() {
            assert!(numeric_goes_left(1.0, 1.0));
            assert!(numeric_goes_left(0.5, 1.0));
            assert!(!numeric_goes_left(1.5, 1.0));
            assert!(numeric_goes_left(f64::NAN, 1.0));
            assert!(numeric_goes_left(f64::NAN, f64::NAN));
            assert!(!numeric_goes_left(-1e300, f64::NAN));
        }

        #[test]
        fn text_routing_orders_by_length_first() {
            assert!(text_goes_left(b"zzz", b"aaaaa"));
            assert!(!text_goes_left(b"aaaaa", b"zzz"));
            assert!(text_goes_left(b"abc", b"abd"));
            assert!(text_goes_left(b"abc", b"abc"));
            assert!(!text_goes_left(b"abd", b"abc"));
        }

        #[test]
        fn single_observation_is_a_leaf() {
            let data = ColumnarData::from_observation_rows(&array![[1.0, 2.0], [3.0, 4.0]]);
            let mut rng = ChaCha8Rng::seed_from_u64(7);
            let tree = IsolationTree::grow(&data, vec![1], 10, &mut rng).unwrap();

            assert_eq!(*tree.root(), IsolationNode::Leaf { size: 1 });
            assert_eq!(tree.path_length(&data, 0), 0.);
        }

        #[test]
        fn identical_values_leave_empty_right_leaf() {
            let data = ColumnarData::from_observation_rows(&array![[5.0], [5.0], [5.0], [5.0]]);
            let mut rng = ChaCha8Rng::seed_from_u64(1);
            let tree = IsolationTree::grow(&data, vec![0, 1, 2, 3], 1, &mut rng).unwrap();

            match tree.root() {
                IsolationNode::NumericSplit {
                    left,
                    right,
                    attribute,
                    pivot,
                    size,
                } => {
                    assert_eq!(*attribute, 0);
                    assert_eq!(*pivot, 5.0);
                    assert_eq!(*size, 4);
                    assert_eq!(**left, IsolationNode::Leaf { size: 4 });
                    assert_eq!(**right, IsolationNode::Leaf { size: 0 });
                }
                other => panic!("expected a numeric split, got {:?}", other),
            }
            let expected = 1. + average_path_length(4);
            assert!((tree.path_length(&data, 2) - expected).abs() < 1e-12);
        }

        #[test]
        fn depth_never_exceeds_height_limit() {
            let x: Array2<f64> = Array::random((300, 3), Normal::new(0.0, 1.0).unwrap());
            let data = ColumnarData::from_observation_rows(&x);
            let mut rng = ChaCha8Rng::seed_from_u64(99);
            for limit in 0..9 {
                let tree = IsolationTree::grow(&data, (0..300).collect(), limit, &mut rng).unwrap();
                assert!(tree.depth() <= limit as usize);
                assert_eq!(tree.root().size(), 300);
                assert_eq!(tree.leaf_count() * 2 - 1, tree.node_count());
            }
        }

        #[test]
        fn text_split_partitions_by_length() {
            let data = ColumnarData::from_text(Array2::from_shape_vec(
                (1, 3),
                vec![b"abc".to_vec(), b"zz".to_vec(), b"hello".to_vec()],
            )
            .unwrap());
            let mut rng = ChaCha8Rng::seed_from_u64(3);
            let tree = IsolationTree::grow(&data, vec![0, 1, 2], 2, &mut rng).unwrap();

            match tree.root() {
                IsolationNode::TextSplit {
                    left, right, pivot, ..
                } => {
                    // Whatever pivot was drawn, sizes follow the length rule.
                    let values: [&[u8]; 3] = [b"abc", b"zz", b"hello"];
                    let n_left = values
                        .iter()
                        .filter(|v| text_goes_left(v, pivot))
                        .count();
                    assert_eq!(left.size(), n_left);
                    assert_eq!(right.size(), 3 - n_left);
                }
                other => panic!("expected a text split, got {:?}", other),
            }
        }

        #[test]
        fn sample_outside_data_is_rejected() {
            let data = ColumnarData::from_observation_rows(&array![[1.0], [2.0], [3.0]]);
            let mut rng = ChaCha8Rng::seed_from_u64(5);
            assert_eq!(
                IsolationTree::grow(&data, vec![0, 3, 1], 2, &mut rng),
                Err(ForestError::ObservationOutOfRange {
                    observation: 3,
                    observation_count: 3
                })
            );
        }

        #[test]
        fn splitting_without_attributes_is_rejected() {
            let data = ColumnarData::from_numeric(Array2::zeros((0, 4)));
            let mut rng = ChaCha8Rng::seed_from_u64(0);
            assert!(IsolationTree::grow(&data, vec![0, 1, 2, 3], 2, &mut rng).is_err());
            assert!(IsolationTree::grow(&data, vec![0], 2, &mut rng).is_ok());
        }
    }
}
