//! Reader for the clustering tool's CSV export.
//!
//! Layout: a header row, a `GLOBALS:` row carrying the distance and linkage
//! algorithm names and the bin count, then one row per record. Time-bin data
//! follows the fixed columns as `numbins` raw values then `numbins`
//! normalised values.

use super::record::{FileGlobals, LoadOptions, RecordRow, RecordSet, Rgb};
use super::LoadError;
use std::str::FromStr;

const HEADER_WITH_ARCHETYPE: &str =
    "name,mchan,ap,rl,dp,dchan,ref,r,g,b,ap_atlas,rl_atlas,dp_atlas,expname,period,archetype";
const HEADER_LEGACY: &str =
    "name,mchan,ap,rl,dp,dchan,ref,r,g,b,ap_atlas,rl_atlas,dp_atlas,expname,period";

const NAME: usize = 0;
const MCHAN: usize = 1;
const R: usize = 7;
const G: usize = 8;
const B: usize = 9;
const AP_ATLAS: usize = 10;
const RL_ATLAS: usize = 11;
const DP_ATLAS: usize = 12;
const EXPNAME: usize = 13;
const PERIOD: usize = 14;
const ARCHETYPE: usize = 15;

/// Fields every record row must carry (name through period).
pub const MIN_FIELDS: usize = PERIOD + 1;

/// Parse CSV text into a record set.
pub fn load_csv_str(text: &str) -> Result<RecordSet, LoadError> {
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());

    let header = lines.next().ok_or(LoadError::Empty)?.trim_start_matches('\u{feff}');
    let cth_start = if header.starts_with(HEADER_WITH_ARCHETYPE) {
        ARCHETYPE + 1
    } else if header.starts_with(HEADER_LEGACY) {
        PERIOD + 1
    } else {
        return Err(LoadError::UnrecognizedHeader);
    };

    let globals = parse_globals(lines.next().ok_or(LoadError::MissingGlobals)?)?;
    let has_archetypes = globals.has_archetypes() && cth_start > ARCHETYPE;

    let mut skipped = 0;
    let mut rows = Vec::new();
    for (line_no, line) in lines.enumerate() {
        match parse_row(line, cth_start, globals.bins, has_archetypes) {
            Ok(row) => rows.push(row),
            Err(reason) => {
                // +3: header, globals, 1-based
                log::warn!("Line {} {}, skipped", line_no + 3, reason);
                skipped += 1;
            }
        }
    }

    let mut set = RecordSet::from_rows(rows, &LoadOptions::default())?;
    set.set_globals(globals);
    set.add_skipped(skipped);
    Ok(set)
}

fn parse_globals(line: &str) -> Result<FileGlobals, LoadError> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() < 4 || fields[0] != "GLOBALS:" {
        return Err(LoadError::MissingGlobals);
    }
    let bins = fields[3].parse().map_err(|_| LoadError::MissingGlobals)?;
    Ok(FileGlobals {
        distance: fields[1].to_string(),
        linkage: fields[2].to_string(),
        bins,
    })
}

fn field<T: FromStr>(fields: &[&str], index: usize, what: &str) -> Result<T, String> {
    let value = fields
        .get(index)
        .ok_or_else(|| format!("is too short for its {} value", what))?;
    value
        .parse()
        .map_err(|_| format!("has an unreadable {} value '{}'", what, value))
}

fn parse_row(
    line: &str,
    cth_start: usize,
    bins: usize,
    has_archetypes: bool,
) -> Result<RecordRow, String> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() < MIN_FIELDS {
        return Err("is too short".to_string());
    }

    let atlas = [
        field(&fields, AP_ATLAS, "ap")?,
        field(&fields, RL_ATLAS, "rl")?,
        field(&fields, DP_ATLAS, "dp")?,
    ];
    let color = Rgb::new(
        field(&fields, R, "red")?,
        field(&fields, G, "green")?,
        field(&fields, B, "blue")?,
    );
    let archetype = if has_archetypes {
        field(&fields, ARCHETYPE, "archetype")?
    } else {
        0
    };

    let mut raw_bins = Vec::new();
    let mut norm_bins = Vec::new();
    if fields.len() > cth_start {
        let values = &fields[cth_start..];
        if values.len() < bins * 2 {
            return Err(format!("has {} bin values, expected {}", values.len(), bins * 2));
        }
        for (i, value) in values[..bins * 2].iter().enumerate() {
            let v: f32 = value
                .parse()
                .map_err(|_| format!("has an unreadable bin value '{}'", value))?;
            if i < bins {
                raw_bins.push(v);
            } else {
                norm_bins.push(v);
            }
        }
    }

    Ok(RecordRow {
        name: fields[NAME].to_string(),
        channel: field(&fields, MCHAN, "channel")?,
        atlas,
        color,
        experiment: Some(fields[EXPNAME].to_string()),
        period: fields[PERIOD].to_string(),
        archetype,
        raw_bins,
        norm_bins,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DisplayCategory;

    fn sample() -> String {
        let mut text = String::new();
        text.push_str(HEADER_WITH_ARCHETYPE);
        text.push_str(",cth\n");
        text.push_str("GLOBALS:,euclidean,archetype,3\n");
        text.push_str("c1,5,0,0,0,d,r,0.2,0.4,0.6,1.5,2.0,-3.0,exp1,CONTROL,7,10,20,30,0.1,0.5,1.0\n");
        text.push_str("c1,5,0,0,0,d,r,0.2,0.4,0.6,1.5,2.0,-3.0,exp1,CCO2STIM,7,10,20,30,0.2,0.6,0.9\n");
        text.push_str("c2,6,0,0,0,d,r,0.9,0.1,0.1,1.5,2.0,-3.0,exp2,CONTROL,400,1,2,3,0.0,0.0,0.0\n");
        text.push_str("d1,5,0,0,0,d,r,-1,0,0,1.5,2.0,-3.0,exp1,CS-DELTA,400,1,2,3,-0.5,0.0,0.5\n");
        text.push_str("short,1,2\n");
        text.push_str("nocoord,1,0,0,0,d,r,0.3,0.3,0.3,0,0,0,exp3,CONTROL,0\n");
        text
    }

    #[test]
    fn test_loads_sample() {
        let set = load_csv_str(&sample()).unwrap();
        assert_eq!(set.globals().map(|g| g.bins), Some(3));
        assert_eq!(set.cluster_count(), 2);
        assert_eq!(set.num_bins(), 3);
        assert_eq!(set.skipped_count(), 1);
        assert_eq!(set.unplaced().len(), 1);
        assert_eq!(set.experiments().len(), 3);
        assert!(set.has_delta());
        assert_eq!(set.archetypes().iter().copied().collect::<Vec<_>>(), vec![7]);

        let stim = set.cluster_records(DisplayCategory::Stim, 0);
        assert_eq!(stim.len(), 1);
        assert_eq!(stim[0].norm_bins, vec![0.2, 0.6, 0.9]);
        assert_eq!(stim[0].raw_bins, vec![10.0, 20.0, 30.0]);
    }

    #[test]
    fn test_same_cell_same_jitter_across_periods() {
        let set = load_csv_str(&sample()).unwrap();
        let control = &set.cluster_records(DisplayCategory::Control, 0)[0];
        let stim = &set.cluster_records(DisplayCategory::Stim, 0)[0];
        assert_eq!(control.position, stim.position);
        // A different (experiment, channel) at the same spot moves.
        let other = &set.cluster_records(DisplayCategory::Control, 1)[0];
        assert_ne!(other.position, control.position);
    }

    #[test]
    fn test_load_twice_is_deterministic() {
        let a = load_csv_str(&sample()).unwrap();
        let b = load_csv_str(&sample()).unwrap();
        let pa: Vec<_> = a.records(DisplayCategory::Control).map(|r| r.position).collect();
        let pb: Vec<_> = b.records(DisplayCategory::Control).map(|r| r.position).collect();
        assert_eq!(pa, pb);
    }

    #[test]
    fn test_legacy_header_accepted() {
        let text = format!(
            "{}\nGLOBALS:,corr,ward,0\nc1,1,0,0,0,d,r,0.1,0.2,0.3,1,1,1,e,CONTROL\n",
            HEADER_LEGACY
        );
        let set = load_csv_str(&text).unwrap();
        assert_eq!(set.placed_count(), 1);
        assert_eq!(set.num_bins(), 0);
    }

    #[test]
    fn test_bad_header_rejected() {
        assert!(matches!(
            load_csv_str("a,b,c\nGLOBALS:,x,y,1\n"),
            Err(LoadError::UnrecognizedHeader)
        ));
        assert!(matches!(load_csv_str(""), Err(LoadError::Empty)));
    }

    #[test]
    fn test_row_without_archetype_column_skipped() {
        let text = format!(
            "{}\nGLOBALS:,euclidean,archetype,0\n\
             c1,1,0,0,0,d,r,0.1,0.2,0.3,1,1,1,e,CONTROL\n\
             c2,2,0,0,0,d,r,0.1,0.2,0.3,1,1,1,e,CONTROL,4\n",
            HEADER_WITH_ARCHETYPE
        );
        let set = load_csv_str(&text).unwrap();
        assert_eq!(set.skipped_count(), 1);
        assert_eq!(set.placed_count(), 1);
        assert_eq!(set.archetypes().iter().copied().collect::<Vec<_>>(), vec![4]);
    }

    #[test]
    fn test_missing_globals_rejected() {
        let text = format!("{}\nc1,1,0,0,0,d,r,0.1,0.2,0.3,1,1,1,e,CONTROL\n", HEADER_LEGACY);
        assert!(matches!(load_csv_str(&text), Err(LoadError::MissingGlobals)));
    }
}
