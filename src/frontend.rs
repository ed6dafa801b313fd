//! Minimal layer-file frontend: parses the `<layer_type> <d1> … <d_k>`
//! line format (§6) and lowers `Matmul`/`MatmulAct` lines into a chain of
//! systolic-array jobs connected by [`JobArena::connect_lists`].
//!
//! This is a demo-only stand-in for the full layer-to-job-graph
//! translation, which spec.md §1 scopes out as an external collaborator;
//! it exists so `src/bin/accelsim.rs` has something to run end to end.

use crate::core::JobIndex;
use crate::error::{EngineError, Result};
use crate::job::{JobArena, JobPayload};

/// One parsed layer-file line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LayerConfig {
    pub layer_type: String,
    pub dims: Vec<u32>,
}

/// Parses the layer-file text (§6: "Line-oriented text. Each non-empty
/// line: `<layer_type> <d1> <d2> … <d_k>` with 1 ≤ k ≤ 8"). Blank lines
/// are skipped.
pub fn parse_layer_file(text: &str) -> Result<Vec<LayerConfig>> {
    let mut layers = Vec::new();
    for (i, line) in text.lines().enumerate() {
        let line_no = i + 1;
        if line.trim().is_empty() {
            continue;
        }
        let mut tokens = line.split_whitespace();
        let layer_type = tokens.next().ok_or_else(|| EngineError::InvalidLayerLine {
            line_no,
            line: line.to_string(),
        })?;
        let dims: Vec<u32> = tokens
            .map(|t| {
                t.parse::<u32>().map_err(|_| EngineError::InvalidLayerLine {
                    line_no,
                    line: line.to_string(),
                })
            })
            .collect::<Result<_>>()?;
        if dims.is_empty() || dims.len() > 8 {
            return Err(EngineError::UnsupportedDimensionCount {
                line_no,
                found: dims.len(),
            });
        }
        layers.push(LayerConfig {
            layer_type: layer_type.to_string(),
            dims,
        });
    }
    Ok(layers)
}

/// Lowers parsed layers into a chain of `Matmul` jobs, each layer's jobs
/// made children of the previous layer's via `connect_lists`. Only
/// `Matmul` and `MatmulAct` (treated identically: the activation folds
/// into the systolic `write` stage and adds no extra job) are supported —
/// the remaining layer types named in §6 (`Conv`, `Softmax`, `Activation`,
/// `LayerNorm`, `SelfAttention`, `MultiHeadSelfAttention`) belong to the
/// full frontend this crate does not implement.
pub fn lower_to_jobs(layers: &[LayerConfig], arena: &mut JobArena) -> Result<Vec<JobIndex>> {
    let mut previous: Vec<JobIndex> = Vec::new();
    let mut all_roots = Vec::new();
    for (i, layer) in layers.iter().enumerate() {
        let line_no = i + 1;
        match layer.layer_type.as_str() {
            "Matmul" | "MatmulAct" => {
                let [m, k, n] = dims3(layer, line_no)?;
                let job = arena.insert(JobPayload::Matmul { m, k, n }, 0, 0, i as i32, None);
                if previous.is_empty() {
                    all_roots.push(job);
                } else {
                    arena.connect_lists(&previous, &[job]);
                }
                previous = vec![job];
            }
            other => {
                return Err(EngineError::UnknownLayerType {
                    line_no,
                    layer_type: other.to_string(),
                })
            }
        }
    }
    Ok(all_roots)
}

fn dims3(layer: &LayerConfig, line_no: usize) -> Result<[u32; 3]> {
    if layer.dims.len() != 3 {
        return Err(EngineError::UnsupportedDimensionCount {
            line_no,
            found: layer.dims.len(),
        });
    }
    Ok([layer.dims[0], layer.dims[1], layer.dims[2]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_matmul_line_with_three_dims() {
        let layers = parse_layer_file("Matmul 16 16 16\n").unwrap();
        assert_eq!(
            layers,
            vec![LayerConfig {
                layer_type: "Matmul".to_string(),
                dims: vec![16, 16, 16],
            }]
        );
    }

    #[test]
    fn skips_blank_lines() {
        let layers = parse_layer_file("Matmul 1 1 1\n\n\nMatmul 2 2 2\n").unwrap();
        assert_eq!(layers.len(), 2);
    }

    #[test]
    fn rejects_unparsable_dimension() {
        let err = parse_layer_file("Matmul 16 foo 16\n").unwrap_err();
        assert!(matches!(err, EngineError::InvalidLayerLine { line_no: 1, .. }));
    }

    #[test]
    fn rejects_more_than_eight_dims() {
        let err = parse_layer_file("Matmul 1 2 3 4 5 6 7 8 9\n").unwrap_err();
        assert!(matches!(
            err,
            EngineError::UnsupportedDimensionCount { line_no: 1, found: 9 }
        ));
    }

    #[test]
    fn lowers_two_layers_into_chained_jobs() {
        let layers = parse_layer_file("Matmul 4 4 4\nMatmul 4 4 4\n").unwrap();
        let mut arena = JobArena::new();
        let roots = lower_to_jobs(&layers, &mut arena).unwrap();
        assert_eq!(roots.len(), 1);
        assert_eq!(arena.len(), 2);
        assert_eq!(arena.get(roots[0]).children.len(), 1);
    }

    #[test]
    fn unknown_layer_type_is_an_error() {
        let layers = parse_layer_file("Softmax 4\n").unwrap();
        let mut arena = JobArena::new();
        let err = lower_to_jobs(&layers, &mut arena).unwrap_err();
        assert!(matches!(err, EngineError::UnknownLayerType { line_no: 1, .. }));
    }
}
