//! Flat storage: packs shared variables into one contiguous buffer.
//!
//! Offsets depend only on the order and shapes of the packed variables, never
//! on their contents, so packing the same list twice yields the same layout.

mod buffer;

pub use buffer::FlatBuffer;

use rustc_hash::FxHashSet;

use crate::{
    dtype::DType,
    error::{GraphError, Result},
    graph::{Graph, NodeId},
    shape::Shape,
};

/// The slice of a flat buffer assigned to one variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub offset: usize,
    pub len: usize,
    pub shape: Vec<usize>,
}

/// Offsets, lengths and shapes of the variables in a flat buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatLayout {
    segments: Vec<Segment>,
    dtype: DType,
}

impl FlatLayout {
    /// Lays out `shapes` end to end in order.
    pub fn new(shapes: &[Vec<usize>], dtype: DType) -> Self {
        let mut offset = 0;
        let segments = shapes
            .iter()
            .map(|shape| {
                let len = shape.iter().product();
                let segment = Segment {
                    offset,
                    len,
                    shape: shape.clone(),
                };
                offset += len;
                segment
            })
            .collect();
        FlatLayout { segments, dtype }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn offsets(&self) -> Vec<usize> {
        self.segments.iter().map(|s| s.offset).collect()
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Total number of elements.
    pub fn total_len(&self) -> usize {
        self.segments.iter().map(|s| s.len).sum()
    }

    /// Builds one vector node laying out `nodes` end to end in the order and
    /// at the offsets of this layout.
    ///
    /// `nodes` must match the packed variables length-for-length and
    /// shape-for-shape, otherwise `LayoutError`.
    pub fn concatenate(&self, graph: &mut Graph, nodes: &[NodeId]) -> Result<NodeId> {
        if nodes.len() != self.segments.len() {
            return Err(GraphError::LayoutError(format!(
                "layout has {} segments, got {} nodes",
                self.segments.len(),
                nodes.len()
            )));
        }
        for (i, (&id, segment)) in nodes.iter().zip(&self.segments).enumerate() {
            let node = graph.try_node(id)?;
            let expected = Shape::from(segment.shape.as_slice());
            if node.shape != expected {
                return Err(GraphError::LayoutError(format!(
                    "node {i} ({id}) has shape {}, segment expects {expected}",
                    node.shape
                )));
            }
        }
        let cat = graph.flatcat(nodes)?;
        graph.cast(cat, self.dtype)
    }
}

/// Result of [`pack`]: the owned buffer, its layout, and the variable nodes
/// that now read and write through it.
#[derive(Debug, Clone)]
pub struct FlatStorage {
    buffer: FlatBuffer,
    layout: FlatLayout,
    variables: Vec<NodeId>,
}

impl FlatStorage {
    pub fn buffer(&self) -> &FlatBuffer {
        &self.buffer
    }

    pub fn layout(&self) -> &FlatLayout {
        &self.layout
    }

    /// The packed variable nodes, in packing order.
    pub fn variables(&self) -> &[NodeId] {
        &self.variables
    }

    /// See [`FlatLayout::concatenate`].
    pub fn concatenate(&self, graph: &mut Graph, nodes: &[NodeId]) -> Result<NodeId> {
        self.layout.concatenate(graph, nodes)
    }
}

/// Packs the shared variables behind `nodes` into one new buffer.
///
/// Each variable's current value is copied into its segment and the variable
/// is rebound so every later read or write, including those of functions
/// compiled earlier, goes through the buffer. A variable that was already
/// packed moves to the new buffer.
pub fn pack(graph: &Graph, nodes: &[NodeId]) -> Result<FlatStorage> {
    if nodes.is_empty() {
        return Err(GraphError::LayoutError("nothing to pack".to_string()));
    }

    let mut seen = FxHashSet::default();
    let mut vars = Vec::with_capacity(nodes.len());
    for &id in nodes {
        graph.try_node(id)?;
        let var = graph.shared_variable(id).ok_or_else(|| {
            GraphError::LayoutError(format!("{id} is not a shared variable"))
        })?;
        if !seen.insert(var.id()) {
            return Err(GraphError::LayoutError(format!(
                "shared variable {} is listed twice",
                var.name()
            )));
        }
        vars.push(var.clone());
    }

    let dtype = vars[0].dtype();
    if let Some(other) = vars.iter().find(|v| v.dtype() != dtype) {
        return Err(GraphError::LayoutError(format!(
            "cannot pack {} variable {} with {dtype} variable {}",
            other.dtype(),
            other.name(),
            vars[0].name()
        )));
    }

    let shapes: Vec<Vec<usize>> = vars.iter().map(|v| v.shape().to_vec()).collect();
    let layout = FlatLayout::new(&shapes, dtype);
    let buffer = FlatBuffer::zeros(layout.total_len(), dtype);

    // Read every value before rebinding any, so a variable moving between
    // buffers never observes a half-written one.
    let values = vars
        .iter()
        .map(|v| v.get_value())
        .collect::<Result<Vec<_>>>()?;
    for (value, segment) in values.iter().zip(layout.segments()) {
        buffer.write_range(segment.offset, value)?;
    }
    for (var, segment) in vars.iter().zip(layout.segments()) {
        var.rebind_flat(buffer.clone(), segment.offset);
    }

    log::debug!(
        "Packed {} shared variables into a flat buffer of {} {dtype} elements (offsets {:?})",
        vars.len(),
        layout.total_len(),
        layout.offsets()
    );

    Ok(FlatStorage {
        buffer,
        layout,
        variables: nodes.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, Precision};
    use crate::value::Value;
    use ndarray::array;

    fn double_graph() -> Graph {
        Graph::with_config(Config::new().with_precision(Precision::Double))
    }

    #[test]
    fn test_pack_copies_values_and_rebinds() {
        let mut g = double_graph();
        let w = g.shared("w", Value::from(array![1.0f64, 2.0, 3.0])).unwrap();
        let m = g.shared("m", Value::from(array![[4.0f64, 5.0], [6.0, 7.0]])).unwrap();
        let b = g.shared("b", Value::from(8.0f64)).unwrap();

        let storage = pack(&g, &[w, m, b]).unwrap();
        assert_eq!(storage.layout().offsets(), vec![0, 3, 7]);
        assert_eq!(storage.layout().total_len(), 8);
        assert_eq!(
            storage.buffer().to_vec(),
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]
        );

        let var = g.shared_variable(m).unwrap();
        assert!(var.is_packed());
        assert_eq!(var.get_value().unwrap().shape(), &[2, 2]);
    }

    #[test]
    fn test_writes_are_visible_both_ways() {
        let mut g = double_graph();
        let w = g.shared("w", Value::from(array![1.0f64, 2.0])).unwrap();
        let b = g.shared("b", Value::from(0.0f64)).unwrap();
        let storage = pack(&g, &[w, b]).unwrap();

        storage
            .buffer()
            .set(&Value::from(vec![10.0, 20.0, 30.0]))
            .unwrap();
        let wv = g.shared_variable(w).unwrap().get_value().unwrap();
        assert_eq!(wv.to_f64_vec(), vec![10.0, 20.0]);

        g.shared_variable(b)
            .unwrap()
            .set_value(&Value::from(-1.0f64))
            .unwrap();
        assert_eq!(storage.buffer().to_vec(), vec![10.0, 20.0, -1.0]);
    }

    #[test]
    fn test_layout_is_deterministic() {
        let mut g = double_graph();
        let w = g.shared("w", Value::from(array![1.0f64, 2.0])).unwrap();
        let b = g.shared("b", Value::from(0.0f64)).unwrap();
        let first = pack(&g, &[w, b]).unwrap();
        g.shared_variable(w)
            .unwrap()
            .set_value(&Value::from(array![7.0f64, 9.0]))
            .unwrap();
        let second = pack(&g, &[w, b]).unwrap();
        assert_eq!(first.layout(), second.layout());
        assert!(!first.buffer().ptr_eq(second.buffer()));
        assert_eq!(second.buffer().to_vec(), vec![7.0, 9.0, 0.0]);
    }

    #[test]
    fn test_pack_errors() {
        let mut g = double_graph();
        let w = g.shared("w", Value::from(array![1.0f64, 2.0])).unwrap();
        let i = g.shared("i", Value::from(3i64)).unwrap();
        let x = g.input("x", [2], DType::F64);

        assert!(matches!(pack(&g, &[]), Err(GraphError::LayoutError(_))));
        assert!(matches!(pack(&g, &[w, w]), Err(GraphError::LayoutError(_))));
        assert!(matches!(pack(&g, &[w, x]), Err(GraphError::LayoutError(_))));
        assert!(matches!(pack(&g, &[w, i]), Err(GraphError::LayoutError(_))));
        assert!(matches!(
            pack(&g, &[NodeId(42)]),
            Err(GraphError::UnknownNode(_))
        ));
        assert!(!g.shared_variable(w).unwrap().is_packed());
    }

    #[test]
    fn test_concatenate_checks_layout() {
        let mut g = double_graph();
        let w = g.shared("w", Value::from(array![1.0f64, 2.0])).unwrap();
        let b = g.shared("b", Value::from(0.0f64)).unwrap();
        let storage = pack(&g, &[w, b]).unwrap();

        let cat = storage.concatenate(&mut g, &[w, b]).unwrap();
        assert_eq!(g.node(cat).shape, Shape::from([3]));

        assert!(matches!(
            storage.concatenate(&mut g, &[w]),
            Err(GraphError::LayoutError(_))
        ));
        assert!(matches!(
            storage.concatenate(&mut g, &[b, w]),
            Err(GraphError::LayoutError(_))
        ));
    }
}
