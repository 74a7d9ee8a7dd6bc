use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::agents::AgentResult;
use crate::agents::coordinator::{SKY_AGENT, WEATHER_AGENT};
use crate::tools::astronomy::local_time_of;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimelineCategory {
    Outdoor,
    Indoor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub start: String,
    pub category: TimelineCategory,
    pub activity: String,
}

/// The synthesized day brief: merged per-agent payloads, a narrative summary,
/// and the derived timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DayBrief {
    pub city: String,
    pub generated_at: String,
    pub successful_agents: usize,
    pub total_agents: usize,
    pub sections: Map<String, Value>,
    pub insights: Vec<String>,
    pub recommendations: Vec<String>,
    pub summary: String,
    pub timeline: Vec<TimelineEntry>,
}

/// True when the weather branch signals conditions worth planning around.
pub fn favorability_is_positive(signal: &str) -> bool {
    let lower = signal.to_ascii_lowercase();
    lower.contains("good") || lower.contains("perfect")
}

/// Merge branch results into one brief. Order-independent over `results`;
/// absent or failed branches contribute neutral sections, never nulls. The
/// timeline strategy is picked by the weather branch's favorability signal
/// and shaped by the sky branch's schedule.
pub fn synthesize_brief(city: &str, results: &[AgentResult]) -> DayBrief {
    let mut sections = Map::new();
    let mut insights = Vec::new();
    let mut recommendations = Vec::new();

    for result in results {
        let payload = if result.payload.is_null() {
            json!({})
        } else {
            result.payload.clone()
        };
        sections.insert(result.agent.clone(), payload);
        insights.extend(result.insights.iter().cloned());
        recommendations.extend(result.recommendations.iter().cloned());
    }

    let successful_agents = results.iter().filter(|result| result.success).count();
    let total_agents = results.len();

    let weather = sections.get(WEATHER_AGENT).cloned().unwrap_or(json!({}));
    let signal = format!(
        "{} {}",
        weather
            .get("favorability")
            .and_then(Value::as_str)
            .unwrap_or(""),
        weather.get("summary").and_then(Value::as_str).unwrap_or("")
    );
    let outdoor_preferred = favorability_is_positive(&signal);

    let sky = sections.get(SKY_AGENT).cloned().unwrap_or(json!({}));
    let timeline = if outdoor_preferred {
        outdoor_first_timeline(&sky)
    } else {
        indoor_first_timeline(&sky)
    };

    let summary = format!(
        "Day brief for {city}: {successful_agents}/{total_agents} agents reported. {}",
        if outdoor_preferred {
            "Conditions favor an outdoor-first day."
        } else {
            "Conditions favor an indoor-first day."
        }
    );

    DayBrief {
        city: city.to_string(),
        generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        successful_agents,
        total_agents,
        sections,
        insights,
        recommendations,
        summary,
        timeline,
    }
}

fn sky_times(sky: &Value) -> (String, String) {
    let sunrise = sky
        .get("sunrise")
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
        .map(|value| local_time_of(value).to_string())
        .unwrap_or_else(|| "07:00".to_string());
    let sunset = sky
        .get("sunset")
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
        .map(|value| local_time_of(value).to_string())
        .unwrap_or_else(|| "19:00".to_string());
    (sunrise, sunset)
}

fn outdoor_first_timeline(sky: &Value) -> Vec<TimelineEntry> {
    let (sunrise, sunset) = sky_times(sky);
    vec![
        TimelineEntry {
            start: sunrise,
            category: TimelineCategory::Outdoor,
            activity: "Morning walk in the early light".to_string(),
        },
        TimelineEntry {
            start: "12:30".to_string(),
            category: TimelineCategory::Outdoor,
            activity: "Lunch at an outdoor table".to_string(),
        },
        TimelineEntry {
            start: "15:00".to_string(),
            category: TimelineCategory::Indoor,
            activity: "Focused work block".to_string(),
        },
        TimelineEntry {
            start: sunset,
            category: TimelineCategory::Outdoor,
            activity: "Catch the sunset".to_string(),
        },
    ]
}

fn indoor_first_timeline(sky: &Value) -> Vec<TimelineEntry> {
    let (_, sunset) = sky_times(sky);
    vec![
        TimelineEntry {
            start: "09:30".to_string(),
            category: TimelineCategory::Indoor,
            activity: "Museum or gallery visit".to_string(),
        },
        TimelineEntry {
            start: "12:30".to_string(),
            category: TimelineCategory::Indoor,
            activity: "Long lunch somewhere warm".to_string(),
        },
        TimelineEntry {
            start: "15:00".to_string(),
            category: TimelineCategory::Indoor,
            activity: "Reading or a matinee".to_string(),
        },
        TimelineEntry {
            start: sunset,
            category: TimelineCategory::Indoor,
            activity: "Evening film at home".to_string(),
        },
    ]
}

impl DayBrief {
    pub fn format_summary(&self) -> String {
        let mut out = format!("## Day Brief: {}\n\n", self.city);
        out.push_str(&format!("{}\n\n", self.summary));
        out.push_str(&format!(
            "**Agents:** {}/{} successful\n\n",
            self.successful_agents, self.total_agents
        ));

        if !self.insights.is_empty() {
            out.push_str("### Insights\n");
            for insight in &self.insights {
                out.push_str(&format!("- {insight}\n"));
            }
            out.push('\n');
        }

        if !self.recommendations.is_empty() {
            out.push_str("### Recommendations\n");
            for recommendation in &self.recommendations {
                out.push_str(&format!("- {recommendation}\n"));
            }
            out.push('\n');
        }

        out.push_str("### Timeline\n");
        for entry in &self.timeline {
            out.push_str(&format!(
                "- {} [{}] {}\n",
                entry.start,
                match entry.category {
                    TimelineCategory::Outdoor => "outdoor",
                    TimelineCategory::Indoor => "indoor",
                },
                entry.activity
            ));
        }

        out
    }
}
