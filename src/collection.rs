// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Browsing helpers and portfolio statistics over the collection

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::str::FromStr;

use crate::currency::{format_eur, parse_amount, sum_amounts};
use crate::model::{ExpertStatus, Stamp};

/// Album filter value meaning "every album"
pub const ALL_ALBUMS: &str = "all";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    Name,
    EstimatedValue,
    Year,
    Origin,
    #[default]
    DateAdded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "name" => Ok(SortKey::Name),
            "estimated_value" | "value" => Ok(SortKey::EstimatedValue),
            "year" => Ok(SortKey::Year),
            "origin" => Ok(SortKey::Origin),
            "date_added" | "date" => Ok(SortKey::DateAdded),
            other => Err(format!("unknown sort key '{}'", other)),
        }
    }
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            other => Err(format!("unknown sort order '{}'", other)),
        }
    }
}

/// Which stamps to show
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CollectionQuery {
    #[serde(default)]
    pub search: String,
    /// `None` or [`ALL_ALBUMS`] shows every album
    pub album: Option<String>,
    #[serde(default)]
    pub sort: SortKey,
    #[serde(default)]
    pub order: SortOrder,
}

impl CollectionQuery {
    fn matches(&self, stamp: &Stamp) -> bool {
        let term = self.search.trim().to_lowercase();
        let matches_search = term.is_empty()
            || stamp.name.to_lowercase().contains(&term)
            || stamp.origin.to_lowercase().contains(&term)
            || stamp.description.to_lowercase().contains(&term);

        let matches_album = match self.album.as_deref() {
            None | Some(ALL_ALBUMS) => true,
            Some(album) => stamp.album == album,
        };

        matches_search && matches_album
    }
}

/// Filter and sort the collection
pub fn browse<'a>(stamps: &'a [Stamp], query: &CollectionQuery) -> Vec<&'a Stamp> {
    let mut result: Vec<&Stamp> = stamps.iter().filter(|s| query.matches(s)).collect();

    result.sort_by(|a, b| {
        let ord = compare(a, b, query.sort);
        match query.order {
            SortOrder::Asc => ord,
            SortOrder::Desc => ord.reverse(),
        }
    });

    result
}

fn compare(a: &Stamp, b: &Stamp, key: SortKey) -> Ordering {
    match key {
        SortKey::Name => a.name.cmp(&b.name),
        SortKey::Year => a.year.cmp(&b.year),
        SortKey::Origin => a.origin.cmp(&b.origin),
        SortKey::DateAdded => a.date_added.cmp(&b.date_added),
        SortKey::EstimatedValue => parse_amount(a.effective_value())
            .partial_cmp(&parse_amount(b.effective_value()))
            .unwrap_or(Ordering::Equal),
    }
}

/// Figures shown on the dashboard
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioStats {
    pub stamp_count: usize,
    pub total_value: f64,
    pub total_value_display: String,
    pub appraised_count: usize,
    pub pending_count: usize,
    /// Stamp count per album, largest first
    pub albums: Vec<(String, usize)>,
}

pub fn portfolio_stats(stamps: &[Stamp]) -> PortfolioStats {
    let total_value = sum_amounts(stamps.iter().map(Stamp::effective_value));

    let mut albums: Vec<(String, usize)> = Vec::new();
    for stamp in stamps {
        match albums.iter_mut().find(|(name, _)| name == &stamp.album) {
            Some((_, count)) => *count += 1,
            None => albums.push((stamp.album.clone(), 1)),
        }
    }
    albums.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    PortfolioStats {
        stamp_count: stamps.len(),
        total_value,
        total_value_display: format_eur(total_value),
        appraised_count: with_status(stamps, ExpertStatus::Appraised).count(),
        pending_count: with_status(stamps, ExpertStatus::Pending).count(),
        albums,
    }
}

/// Stamps in a given review state, in collection order
pub fn with_status(stamps: &[Stamp], status: ExpertStatus) -> impl Iterator<Item = &Stamp> {
    stamps.iter().filter(move |s| s.expert_status == status)
}

/// The newest `limit` stamps (the collection is already newest first)
pub fn recent(stamps: &[Stamp], limit: usize) -> &[Stamp] {
    &stamps[..stamps.len().min(limit)]
}

/// One line per stamp, as given to the advisor
pub fn collection_summary(stamps: &[Stamp]) -> String {
    stamps
        .iter()
        .map(|s| format!("{} ({}, {}) - Wert: {}", s.name, s.origin, s.year, s.estimated_value))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StampDraft;
    use chrono::{Duration, Utc};

    fn stamp(name: &str, origin: &str, year: &str, value: &str, album: &str, age_days: i64) -> Stamp {
        let draft = StampDraft {
            name: Some(name.into()),
            origin: Some(origin.into()),
            year: Some(year.into()),
            estimated_value: Some(value.into()),
            description: Some(format!("{} from {}", name, origin)),
            ..Default::default()
        };
        let mut s = Stamp::from_draft(&draft, String::new(), album);
        s.date_added = Utc::now() - Duration::days(age_days);
        s
    }

    fn sample() -> Vec<Stamp> {
        vec![
            stamp("Penny Black", "Great Britain", "1840", "350,00 €", "Europa Klassik", 1),
            stamp("Inverted Jenny", "USA", "1918", "1.500.000 €", "Seltenheiten", 5),
            stamp("Sachsen Dreier", "Sachsen", "1850", "12.000,00 €", "Europa Klassik", 3),
        ]
    }

    fn names(list: &[&Stamp]) -> Vec<String> {
        list.iter().map(|s| s.name.clone()).collect()
    }

    #[test]
    fn test_search_is_case_insensitive_across_fields() {
        let stamps = sample();
        let query = CollectionQuery { search: "usa".into(), ..Default::default() };
        assert_eq!(names(&browse(&stamps, &query)), ["Inverted Jenny"]);

        let query = CollectionQuery { search: "FROM SACHSEN".into(), ..Default::default() };
        assert_eq!(names(&browse(&stamps, &query)), ["Sachsen Dreier"]);
    }

    #[test]
    fn test_album_filter() {
        let stamps = sample();
        let query = CollectionQuery {
            album: Some("Europa Klassik".into()),
            sort: SortKey::Name,
            order: SortOrder::Asc,
            ..Default::default()
        };
        assert_eq!(names(&browse(&stamps, &query)), ["Penny Black", "Sachsen Dreier"]);

        let all = CollectionQuery { album: Some(ALL_ALBUMS.into()), ..Default::default() };
        assert_eq!(browse(&stamps, &all).len(), 3);
    }

    #[test]
    fn test_sort_by_value_prefers_expert_valuation() {
        let mut stamps = sample();
        stamps[0].expert_status = ExpertStatus::Appraised;
        stamps[0].expert_valuation = Some("2.000.000 €".into());

        let query = CollectionQuery { sort: SortKey::EstimatedValue, order: SortOrder::Desc, ..Default::default() };
        assert_eq!(
            names(&browse(&stamps, &query)),
            ["Penny Black", "Inverted Jenny", "Sachsen Dreier"]
        );
    }

    #[test]
    fn test_default_sort_is_newest_first() {
        let stamps = sample();
        let query = CollectionQuery::default();
        assert_eq!(
            names(&browse(&stamps, &query)),
            ["Penny Black", "Sachsen Dreier", "Inverted Jenny"]
        );
    }

    #[test]
    fn test_sort_key_parsing() {
        assert_eq!("value".parse::<SortKey>().unwrap(), SortKey::EstimatedValue);
        assert_eq!("date-added".parse::<SortKey>().unwrap(), SortKey::DateAdded);
        assert_eq!("ASC".parse::<SortOrder>().unwrap(), SortOrder::Asc);
        assert!("size".parse::<SortKey>().is_err());
    }

    #[test]
    fn test_portfolio_stats() {
        let mut stamps = sample();
        stamps[1].expert_status = ExpertStatus::Pending;
        stamps[2].expert_status = ExpertStatus::Appraised;
        stamps[2].expert_valuation = Some("10.000,00 €".into());

        let stats = portfolio_stats(&stamps);
        assert_eq!(stats.stamp_count, 3);
        assert_eq!(stats.pending_count, 1);
        assert_eq!(stats.appraised_count, 1);
        assert_eq!(stats.total_value_display, "€1.510.350,00");
        assert_eq!(stats.albums[0], ("Europa Klassik".to_string(), 2));
    }

    #[test]
    fn test_summary_and_recent() {
        let stamps = sample();
        let summary = collection_summary(&stamps);
        assert_eq!(summary.lines().count(), 3);
        assert!(summary.starts_with("Penny Black (Great Britain, 1840) - Wert: 350,00 €"));

        assert_eq!(recent(&stamps, 2).len(), 2);
        assert_eq!(recent(&stamps, 10).len(), 3);
        assert!(collection_summary(&[]).is_empty());
    }
}
