//! Python bindings, built with the `python` feature.

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use crate::common_types::ThresholdingMethod;
use crate::error::KdForestError;
use crate::kdforest::{Distance, KdForest};

impl From<KdForestError> for PyErr {
    fn from(err: KdForestError) -> PyErr {
        PyValueError::new_err(err.to_string())
    }
}

/// Python-friendly representation of Distance
#[pyclass(name = "Distance")]
#[derive(Clone, Copy, Debug)]
enum PyDistance {
    L2,
    L1,
}

impl From<PyDistance> for Distance {
    fn from(val: PyDistance) -> Self {
        match val {
            PyDistance::L2 => Distance::L2,
            PyDistance::L1 => Distance::L1,
        }
    }
}

impl From<Distance> for PyDistance {
    fn from(val: Distance) -> Self {
        match val {
            Distance::L2 => PyDistance::L2,
            Distance::L1 => PyDistance::L1,
        }
    }
}

#[pyclass(name = "ThresholdingMethod")]
#[derive(Clone, Copy, Debug)]
enum PyThresholdingMethod {
    Median,
    Mean,
}

impl From<PyThresholdingMethod> for ThresholdingMethod {
    fn from(val: PyThresholdingMethod) -> Self {
        match val {
            PyThresholdingMethod::Median => ThresholdingMethod::Median,
            PyThresholdingMethod::Mean => ThresholdingMethod::Mean,
        }
    }
}

impl From<ThresholdingMethod> for PyThresholdingMethod {
    fn from(val: ThresholdingMethod) -> Self {
        match val {
            ThresholdingMethod::Median => PyThresholdingMethod::Median,
            ThresholdingMethod::Mean => PyThresholdingMethod::Mean,
        }
    }
}

/// KD-forest over `float` rows. The forest owns a flattened copy of the rows
/// passed to `build`.
#[pyclass(name = "KdForest")]
struct PyKdForest {
    forest: KdForest<f64, Vec<f64>>,
}

#[pymethods]
impl PyKdForest {
    #[new]
    #[pyo3(signature = (dimension, num_trees = 1, distance = PyDistance::L2, seed = None))]
    fn new(
        dimension: usize,
        num_trees: usize,
        distance: PyDistance,
        seed: Option<u64>,
    ) -> PyResult<Self> {
        let mut forest = KdForest::new(dimension, num_trees, distance.into())?;
        forest.set_seed(seed);
        Ok(PyKdForest { forest })
    }

    fn build(&mut self, rows: Vec<Vec<f64>>) -> PyResult<()> {
        let dimension = self.forest.dimension();
        if let Some(row) = rows.iter().position(|row| row.len() != dimension) {
            return Err(PyValueError::new_err(format!(
                "Row {} has {} components but the forest dimension is {}",
                row,
                rows[row].len(),
                dimension
            )));
        }
        let data: Vec<f64> = rows.into_iter().flatten().collect();
        self.forest.build(data)?;
        Ok(())
    }

    /// Returns `num_neighbors` pairs `(index, distance)` sorted by distance.
    /// Unfilled slots are `(None, nan)`.
    fn query(&self, vector: Vec<f64>, num_neighbors: usize) -> PyResult<Vec<(Option<usize>, f64)>> {
        let neighbors = self.forest.query(&vector, num_neighbors)?;
        Ok(neighbors
            .into_iter()
            .map(|neighbor| (neighbor.index, neighbor.distance))
            .collect())
    }

    fn tree_depth(&self, index: usize) -> PyResult<usize> {
        self.forest
            .tree_depth(index)
            .ok_or_else(|| PyValueError::new_err(format!("No tree at index {}", index)))
    }

    fn tree_num_nodes(&self, index: usize) -> PyResult<usize> {
        self.forest
            .tree_num_nodes(index)
            .ok_or_else(|| PyValueError::new_err(format!("No tree at index {}", index)))
    }

    #[getter]
    fn thresholding_method(&self) -> PyThresholdingMethod {
        self.forest.thresholding_method().into()
    }

    #[setter]
    fn set_thresholding_method(&mut self, method: PyThresholdingMethod) {
        self.forest.set_thresholding_method(method.into());
    }

    #[getter]
    fn max_num_comparisons(&self) -> usize {
        self.forest.max_num_comparisons()
    }

    #[setter]
    fn set_max_num_comparisons(&mut self, max_num_comparisons: usize) {
        self.forest.set_max_num_comparisons(max_num_comparisons);
    }

    #[getter]
    fn distance(&self) -> PyDistance {
        self.forest.distance().into()
    }

    #[getter]
    fn num_trees(&self) -> usize {
        self.forest.num_trees()
    }

    #[getter]
    fn dimension(&self) -> usize {
        self.forest.dimension()
    }

    #[getter]
    fn num_data(&self) -> usize {
        self.forest.num_data()
    }
}

#[pymodule]
fn kdforest(_py: Python<'_>, m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyDistance>()?;
    m.add_class::<PyThresholdingMethod>()?;
    m.add_class::<PyKdForest>()?;
    Ok(())
}
