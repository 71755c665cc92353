//! Reader for DX point files.
//!
//! Each `component "positions" value <id>` line is paired with the matching
//! `component "colors" value <id>` line. The referenced `object <id> ...
//! items N` headers are each followed by N lines of three numbers.

use super::jitter::JitterPolicy;
use super::record::{LoadOptions, RecordRow, RecordSet, Rgb};
use super::{LoadError, MAX_POINT_CLUSTERS};

fn component_ids<'a>(lines: &[&'a str], kind: &str) -> Vec<&'a str> {
    let prefix = format!("component \"{}\" value", kind);
    lines
        .iter()
        .filter(|l| l.starts_with(&prefix))
        .filter_map(|l| l.split(' ').nth(3))
        .collect()
}

/// Index of the `object <id> ` header line and its declared item count.
fn object_block(lines: &[&str], id: &str) -> Result<(usize, usize), LoadError> {
    let prefix = format!("object {} ", id);
    let index = lines
        .iter()
        .position(|l| l.starts_with(&prefix))
        .ok_or(LoadError::NotDx)?;
    let tokens: Vec<&str> = lines[index].split(' ').collect();
    let items_at = tokens
        .iter()
        .position(|t| *t == "items")
        .ok_or(LoadError::NotDx)?;
    let count = tokens
        .get(items_at + 1)
        .and_then(|t| t.parse().ok())
        .ok_or(LoadError::NotDx)?;
    Ok((index, count))
}

/// Item line `item` of the block starting at `header`, if the block reaches it.
fn block_item<'a>(lines: &[&'a str], header: usize, item: usize) -> Option<&'a str> {
    lines
        .get(header + item)
        .copied()
        .filter(|l| !l.starts_with("object ") && !l.starts_with("component "))
}

fn triple(line: &str) -> Option<[f64; 3]> {
    let mut values = line.split_whitespace().map(|v| v.parse::<f64>());
    match (values.next(), values.next(), values.next()) {
        (Some(Ok(a)), Some(Ok(b)), Some(Ok(c))) => Some([a, b, c]),
        _ => None,
    }
}

/// Parse DX text into a record set. Every point is a control record.
pub fn load_dx_str(text: &str) -> Result<RecordSet, LoadError> {
    let lines: Vec<&str> = text
        .lines()
        .map(|l| l.trim_end())
        .filter(|l| !l.is_empty())
        .collect();
    if lines.is_empty() {
        return Err(LoadError::Empty);
    }

    let positions = component_ids(&lines, "positions");
    let colors = component_ids(&lines, "colors");
    if positions.is_empty() || colors.is_empty() {
        return Err(LoadError::NotDx);
    }

    let mut skipped = 0;
    let mut rows = Vec::new();
    for (pos_id, color_id) in positions.iter().zip(colors.iter()) {
        let (pos_index, pos_count) = object_block(&lines, pos_id)?;
        let (color_index, color_count) = object_block(&lines, color_id)?;
        if pos_count != color_count {
            return Err(LoadError::CountMismatch {
                positions: pos_count,
                colors: color_count,
            });
        }

        for item in 1..=pos_count {
            let (Some(p_line), Some(c_line)) = (
                block_item(&lines, pos_index, item),
                block_item(&lines, color_index, item),
            ) else {
                return Err(LoadError::Truncated);
            };
            let (Some(atlas), Some(rgb)) = (triple(p_line), triple(c_line)) else {
                log::warn!("DX item {} of object {} is too short, skipped", item, pos_id);
                skipped += 1;
                continue;
            };
            rows.push(RecordRow {
                name: "noname".to_string(),
                channel: 0,
                atlas,
                color: Rgb::new(rgb[0], rgb[1], rgb[2]),
                experiment: None,
                period: "CONTROL".to_string(),
                archetype: 0,
                raw_bins: Vec::new(),
                norm_bins: Vec::new(),
            });
        }
    }

    let options = LoadOptions {
        jitter: JitterPolicy::EveryRepeat,
        max_clusters: Some(MAX_POINT_CLUSTERS),
        ..LoadOptions::default()
    };
    let mut set = RecordSet::from_rows(rows, &options)?;
    set.add_skipped(skipped);
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DisplayCategory;

    const SAMPLE: &str = "\
object 1 class array type float rank 1 shape 3 items 3 data follows
1.0 2.0 3.0
1.0 2.0 3.0
4.0 5.0 6.0
object 2 class array type float rank 1 shape 3 items 3 data follows
1.0 0.0 0.0
1.0 0.0 0.0
0.0 1.0 0.0
object 3 class field
component \"positions\" value 1
component \"colors\" value 2
end
";

    #[test]
    fn test_loads_points() {
        let set = load_dx_str(SAMPLE).unwrap();
        assert_eq!(set.cluster_count(), 2);
        assert_eq!(set.placed_count(), 3);
        assert!(set.experiments().is_empty());
        let red = set.cluster_records(DisplayCategory::Control, 0);
        assert_eq!(red.len(), 2);
        assert_eq!(red[0].name, "noname");
        // Repeats of a location always move in point files.
        assert_ne!(red[0].position, red[1].position);
    }

    #[test]
    fn test_count_mismatch_rejected() {
        let text = SAMPLE.replacen("shape 3 items 3", "shape 3 items 2", 1);
        assert!(matches!(
            load_dx_str(&text),
            Err(LoadError::CountMismatch { positions: 2, colors: 3 })
        ));
    }

    #[test]
    fn test_missing_object_rejected() {
        let text = SAMPLE.replace("component \"colors\" value 2", "component \"colors\" value 9");
        assert!(matches!(load_dx_str(&text), Err(LoadError::NotDx)));
        assert!(matches!(load_dx_str("hello\n"), Err(LoadError::NotDx)));
    }

    #[test]
    fn test_truncated_block_rejected() {
        let text = "\
component \"positions\" value 1
component \"colors\" value 2
object 2 items 1
1 0 0
object 1 items 2
1 1 1
";
        assert!(matches!(load_dx_str(text), Err(LoadError::CountMismatch { .. })));
        let text = "\
component \"positions\" value 1
component \"colors\" value 2
object 2 items 2
1 0 0
0 1 0
object 1 items 2
1 1 1
";
        assert!(matches!(load_dx_str(text), Err(LoadError::Truncated)));
    }

    #[test]
    fn test_block_running_into_next_object_rejected() {
        let text = "\
object 1 items 3
1 1 1
2 2 2
object 2 items 3
1 0 0
0 1 0
0 0 1
component \"positions\" value 1
component \"colors\" value 2
";
        assert!(matches!(load_dx_str(text), Err(LoadError::Truncated)));
    }

    #[test]
    fn test_too_many_clusters_rejected() {
        let n = MAX_POINT_CLUSTERS + 1;
        let mut text = format!("object 1 items {}\n", n);
        for i in 0..n {
            text.push_str(&format!("{} 1 1\n", i + 1));
        }
        text.push_str(&format!("object 2 items {}\n", n));
        for i in 0..n {
            text.push_str(&format!("{} 0 0\n", i as f64 / n as f64));
        }
        text.push_str("component \"positions\" value 1\ncomponent \"colors\" value 2\n");
        assert!(matches!(load_dx_str(&text), Err(LoadError::TooManyClusters(257))));
    }
}
