//! Zoom search: narrow a candidate set to the top-k worst offenders
//!
//! Given per-kernel (or per-region) values, keep the candidates a
//! comparator flags against a threshold, rank them worst-first, and cut to
//! the top k. Policies use this to shrink the trace scope before asking for
//! expensive schedule traces.

/// Comparison direction for flagging offenders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparator {
    pub fn matches(&self, value: f64, threshold: f64) -> bool {
        match self {
            Comparator::Lt => value < threshold,
            Comparator::Le => value <= threshold,
            Comparator::Gt => value > threshold,
            Comparator::Ge => value >= threshold,
        }
    }

    /// Whether smaller values are worse under this comparator.
    fn ascending(&self) -> bool {
        matches!(self, Comparator::Lt | Comparator::Le)
    }
}

impl std::str::FromStr for Comparator {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "<" => Ok(Comparator::Lt),
            "<=" => Ok(Comparator::Le),
            ">" => Ok(Comparator::Gt),
            ">=" => Ok(Comparator::Ge),
            other => anyhow::bail!("invalid comparator: {}", other),
        }
    }
}

/// Names of the at-most-`top_k` worst candidates the comparator flags
/// against `threshold`, worst first.
pub fn zoom_search(
    candidates: &[(String, f64)],
    threshold: f64,
    comparator: Comparator,
    top_k: usize,
) -> Vec<String> {
    let mut flagged: Vec<&(String, f64)> = candidates
        .iter()
        .filter(|(_, value)| comparator.matches(*value, threshold))
        .collect();
    flagged.sort_by(|a, b| {
        let ord = a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal);
        if comparator.ascending() {
            ord
        } else {
            ord.reverse()
        }
    });
    flagged
        .into_iter()
        .take(top_k)
        .map(|(name, _)| name.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates() -> Vec<(String, f64)> {
        vec![
            ("gemm".to_string(), 0.9),
            ("softmax".to_string(), 0.2),
            ("layernorm".to_string(), 0.45),
            ("embedding".to_string(), 0.1),
        ]
    }

    #[test]
    fn test_zoom_low_throughput_worst_first() {
        let bad = zoom_search(&candidates(), 0.5, Comparator::Le, 5);
        assert_eq!(bad, vec!["embedding", "softmax", "layernorm"]);
    }

    #[test]
    fn test_zoom_top_k_cuts() {
        let bad = zoom_search(&candidates(), 0.5, Comparator::Le, 2);
        assert_eq!(bad, vec!["embedding", "softmax"]);
    }

    #[test]
    fn test_zoom_descending_for_greater_than() {
        let bad = zoom_search(&candidates(), 0.4, Comparator::Gt, 5);
        assert_eq!(bad, vec!["gemm", "layernorm"]);
    }

    #[test]
    fn test_zoom_no_offenders() {
        let bad = zoom_search(&candidates(), 0.05, Comparator::Lt, 5);
        assert!(bad.is_empty());
    }

    #[test]
    fn test_comparator_parsing() {
        assert_eq!("<=".parse::<Comparator>().unwrap(), Comparator::Le);
        assert_eq!(">".parse::<Comparator>().unwrap(), Comparator::Gt);
        assert!("~=".parse::<Comparator>().is_err());
    }
}
