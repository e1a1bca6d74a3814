use crate::predict::elements::{parse_lines, OrbitalState};
use crate::predict::error::PredictError;

/// One raw record of a multi-satellite element file.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogRecord {
    pub name: Option<String>,
    pub line1: String,
    pub line2: String,
}

/// Split element text holding any number of two- or three-line records.
/// Lines that belong to no record are skipped.
pub fn split_records(content: &str) -> Vec<CatalogRecord> {
    let lines: Vec<&str> = content
        .lines()
        .map(|l| l.trim_end())
        .filter(|l| !l.trim().is_empty())
        .collect();

    let mut result = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        if lines[i].starts_with("1 ") && i + 1 < lines.len() && lines[i + 1].starts_with("2 ") {
            result.push(CatalogRecord {
                name: None,
                line1: lines[i].to_string(),
                line2: lines[i + 1].to_string(),
            });
            i += 2;
        } else if i + 2 < lines.len()
            && lines[i + 1].starts_with("1 ")
            && lines[i + 2].starts_with("2 ")
        {
            result.push(CatalogRecord {
                name: Some(lines[i].trim().to_string()),
                line1: lines[i + 1].to_string(),
                line2: lines[i + 2].to_string(),
            });
            i += 3;
        } else {
            i += 1;
        }
    }

    result
}

impl CatalogRecord {
    fn norad_id(&self) -> Option<u32> {
        self.line1.get(2..7)?.trim().parse().ok()
    }

    pub fn parse(&self) -> Result<OrbitalState, PredictError> {
        parse_lines(self.name.as_deref(), &self.line1, &self.line2)
    }
}

/// Pick one satellite out of element text. `query` is a catalog number, an
/// exact name, or a case-insensitive fragment of the name line, tried in
/// that order. The first matching record wins.
pub fn select_satellite(content: &str, query: &str) -> Result<OrbitalState, PredictError> {
    let records = split_records(content);
    let query = query.trim();
    let lowered = query.to_lowercase();

    let by_id = query
        .parse::<u32>()
        .ok()
        .and_then(|id| records.iter().find(|r| r.norad_id() == Some(id)));
    let by_exact_name = || {
        records
            .iter()
            .find(|r| r.name.as_deref().map(strip_zero_prefix) == Some(query))
    };
    let by_fragment = || {
        records.iter().find(|r| {
            r.name
                .as_deref()
                .is_some_and(|n| n.to_lowercase().contains(&lowered))
        })
    };

    by_id
        .or_else(by_exact_name)
        .or_else(by_fragment)
        .ok_or_else(|| PredictError::SatelliteNotFound(query.to_string()))?
        .parse()
}

fn strip_zero_prefix(name: &str) -> &str {
    name.strip_prefix("0 ").unwrap_or(name).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predict::elements::tests::{
        ISS_LINE1, ISS_LINE2, ISS_NAME, VANGUARD_LINE1, VANGUARD_LINE2,
    };

    fn group_file() -> String {
        format!(
            "{ISS_NAME}\n{ISS_LINE1}\n{ISS_LINE2}\n\nVANGUARD 1\n{VANGUARD_LINE1}\n{VANGUARD_LINE2}\n"
        )
    }

    #[test]
    fn splits_named_and_unnamed_records() {
        let content = format!("{ISS_LINE1}\n{ISS_LINE2}\ngarbage\nVANGUARD 1\n{VANGUARD_LINE1}\n{VANGUARD_LINE2}");
        let records = split_records(&content);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, None);
        assert_eq!(records[1].name.as_deref(), Some("VANGUARD 1"));
        assert_eq!(records[1].line2, VANGUARD_LINE2);
    }

    #[test]
    fn selects_by_name_fragment_case_insensitively() {
        let state = select_satellite(&group_file(), "vanguard").unwrap();
        assert_eq!(state.norad_id, 5);
        assert_eq!(state.name.as_deref(), Some("VANGUARD 1"));
    }

    #[test]
    fn selects_by_catalog_number() {
        let state = select_satellite(&group_file(), "25544").unwrap();
        assert_eq!(state.name.as_deref(), Some(ISS_NAME));
    }

    #[test]
    fn unknown_satellite_is_reported() {
        let err = select_satellite(&group_file(), "CUBESX-HSE 3").unwrap_err();
        assert_eq!(err, PredictError::SatelliteNotFound("CUBESX-HSE 3".into()));
    }

    #[test]
    fn corrupt_selected_record_is_a_parse_error() {
        let broken = ISS_LINE2.replacen("51.6416", "51.6417", 1);
        let content = format!("{ISS_NAME}\n{ISS_LINE1}\n{broken}\n");
        assert!(matches!(
            select_satellite(&content, "ISS"),
            Err(PredictError::Parse { line: 2, .. })
        ));
    }
}
