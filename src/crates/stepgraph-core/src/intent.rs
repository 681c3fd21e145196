//! Intent vocabulary and the static intent-to-node lookup table
//!
//! An external classifier labels each user turn with one or more [`Intent`]s. The
//! labels are the only non-deterministic input to routing; turning them into node ids
//! is a table lookup, so routers built on [`IntentTable::plan_route`] stay pure and
//! testable without the classifier.

use crate::dispatch::{Dispatch, Route};
use crate::graph::NodeId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// What the user asked for in one turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    UploadImage,
    SetPalette,
    DescribePalette,
    ExtractPalette,
    Recolor,
    AdjustPalette,
    Variation,
    GeneralChat,
}

impl Intent {
    pub const ALL: [Intent; 8] = [
        Intent::UploadImage,
        Intent::SetPalette,
        Intent::DescribePalette,
        Intent::ExtractPalette,
        Intent::Recolor,
        Intent::AdjustPalette,
        Intent::Variation,
        Intent::GeneralChat,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::UploadImage => "upload_image",
            Intent::SetPalette => "set_palette",
            Intent::DescribePalette => "describe_palette",
            Intent::ExtractPalette => "extract_palette",
            Intent::Recolor => "recolor",
            Intent::AdjustPalette => "adjust_palette",
            Intent::Variation => "variation",
            Intent::GeneralChat => "general_chat",
        }
    }

    /// Parse a classifier label, treating anything unrecognised as general chat.
    pub fn parse_lenient(label: &str) -> Intent {
        label.parse().unwrap_or(Intent::GeneralChat)
    }

    /// Read a list of labels from a state field. A single string counts as a
    /// one-element list; non-string entries are skipped.
    pub fn from_labels(value: &Value) -> Vec<Intent> {
        match value {
            Value::String(s) => vec![Intent::parse_lenient(s)],
            Value::Array(items) => items
                .iter()
                .filter_map(Value::as_str)
                .map(Intent::parse_lenient)
                .collect(),
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Intent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Intent::ALL
            .iter()
            .copied()
            .find(|i| i.as_str() == normalized)
            .ok_or_else(|| format!("unknown intent '{}'", s))
    }
}

/// Static lookup `Intent -> node id`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntentTable {
    routes: HashMap<Intent, NodeId>,
}

impl IntentTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table used by the palette conversation workflow
    pub fn palette_workflow() -> Self {
        let mut table = Self::new();
        table
            .map(Intent::UploadImage, "image_agent")
            .map(Intent::SetPalette, "palette_agent")
            .map(Intent::DescribePalette, "palette_agent")
            .map(Intent::ExtractPalette, "palette_agent")
            .map(Intent::AdjustPalette, "palette_agent")
            .map(Intent::Variation, "palette_agent");
        table
    }

    pub fn map(&mut self, intent: Intent, node: impl Into<NodeId>) -> &mut Self {
        self.routes.insert(intent, node.into());
        self
    }

    pub fn target(&self, intent: Intent) -> Option<&str> {
        self.routes.get(&intent).map(String::as_str)
    }

    /// Distinct targets for `intents`, in first-seen order
    pub fn targets(&self, intents: &[Intent]) -> Vec<&str> {
        let mut targets: Vec<&str> = Vec::new();
        for target in intents.iter().filter_map(|i| self.target(*i)) {
            if !targets.contains(&target) {
                targets.push(target);
            }
        }
        targets
    }

    /// Turn an execution plan into a route.
    ///
    /// `plan` lists the nodes the classifier wants to run. A single entry becomes a
    /// plain node route; several entries fan out as dispatches, each overriding
    /// `override_field` with the first intent that maps to that node (or `null` if no
    /// intent does). An empty plan yields `None` so the caller picks the fallback.
    pub fn plan_route(&self, plan: &[NodeId], intents: &[Intent], override_field: &str) -> Option<Route> {
        match plan {
            [] => None,
            [single] => Some(Route::to(single.clone())),
            many => {
                let dispatches = many
                    .iter()
                    .map(|node| {
                        let intent = intents
                            .iter()
                            .find(|i| self.target(**i) == Some(node.as_str()))
                            .map(|i| Value::String(i.as_str().to_string()))
                            .unwrap_or(Value::Null);
                        let mut state_override = Map::new();
                        state_override.insert(override_field.to_string(), intent);
                        Dispatch::new(node.clone(), Value::Object(state_override))
                    })
                    .collect::<Vec<_>>();
                Some(Route::from(dispatches))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_names_roundtrip_through_display() {
        for intent in Intent::ALL {
            assert_eq!(intent.as_str().parse::<Intent>().unwrap(), intent);
            assert_eq!(
                serde_json::to_value(intent).unwrap(),
                Value::String(intent.to_string())
            );
        }
    }

    #[test]
    fn test_lenient_parsing() {
        assert_eq!(Intent::parse_lenient(" Recolor "), Intent::Recolor);
        assert_eq!(Intent::parse_lenient("make it pop"), Intent::GeneralChat);
        assert_eq!(
            Intent::from_labels(&json!(["upload_image", 3, "set_palette"])),
            vec![Intent::UploadImage, Intent::SetPalette]
        );
        assert_eq!(Intent::from_labels(&json!("variation")), vec![Intent::Variation]);
        assert!(Intent::from_labels(&json!(null)).is_empty());
    }

    #[test]
    fn test_palette_table_targets_dedup_in_order() {
        let table = IntentTable::palette_workflow();
        assert_eq!(table.target(Intent::Recolor), None);
        assert_eq!(table.target(Intent::GeneralChat), None);
        assert_eq!(
            table.targets(&[
                Intent::SetPalette,
                Intent::UploadImage,
                Intent::DescribePalette,
                Intent::GeneralChat,
            ]),
            vec!["palette_agent", "image_agent"]
        );
    }

    #[test]
    fn test_plan_route_single_and_fan_out() {
        let table = IntentTable::palette_workflow();
        assert_eq!(table.plan_route(&[], &[], "user_intent"), None);
        assert_eq!(
            table.plan_route(&["image_agent".into()], &[Intent::UploadImage], "user_intent"),
            Some(Route::to("image_agent"))
        );

        let route = table
            .plan_route(
                &["image_agent".into(), "palette_agent".into(), "slot_checker".into()],
                &[Intent::UploadImage, Intent::DescribePalette, Intent::SetPalette],
                "user_intent",
            )
            .unwrap();
        match route {
            Route::Dispatch(dispatches) => {
                assert_eq!(dispatches.len(), 3);
                assert_eq!(dispatches[0].state_override()["user_intent"], json!("upload_image"));
                assert_eq!(dispatches[1].state_override()["user_intent"], json!("describe_palette"));
                assert_eq!(dispatches[2].state_override()["user_intent"], Value::Null);
            }
            other => panic!("expected dispatch, got {:?}", other),
        }
    }
}
