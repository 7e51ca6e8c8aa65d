//! User memory: profiles and chat histories turned into embeddable chunks.
//!
//! Chunk ids are stable per user (`{user_id}_basic_profile`, `{user_id}_trip_2`,
//! ...) so reloading the same files overwrites rather than duplicates.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use regex::Regex;
use serde_json::Value;
use wayfinder_core::models::{ChatHistory, Chunk, Conversation, Metadata, UserProfile};
use wayfinder_core::RagError;

/// Keyword families used to label what a conversation was about.
const TOPIC_KEYWORDS: &[(&str, &str)] = &[
    ("destinations", r"(?i)destination|city|country|place|location|visit"),
    ("accommodation", r"(?i)hotel|hostel|airbnb|resort|stay|accommodation"),
    ("activities", r"(?i)activity|tour|museum|restaurant|food|culture|adventure"),
    ("planning", r"(?i)plan|budget|cost|time|duration|when|how"),
    ("transportation", r"(?i)flight|train|bus|car|transport|travel"),
];

const QUESTION_PREVIEW_CHARS: usize = 200;

pub struct MemoryProcessor {
    profiles: BTreeMap<String, UserProfile>,
    histories: HashMap<String, ChatHistory>,
    max_conversations: usize,
    topics: Vec<(&'static str, Regex)>,
}

fn join_or(items: &[String], fallback: &str) -> String {
    if items.is_empty() {
        fallback.to_string()
    } else {
        items.join(", ")
    }
}

fn or_unknown(value: &Option<String>, fallback: &str) -> String {
    value
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or(fallback)
        .to_string()
}

fn value_text(value: &Option<Value>, fallback: &str) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => fallback.to_string(),
        Some(other) => other.to_string(),
    }
}

impl MemoryProcessor {
    pub fn new(max_conversations: usize) -> Self {
        let topics = TOPIC_KEYWORDS
            .iter()
            .filter_map(|(name, pattern)| Regex::new(pattern).ok().map(|re| (*name, re)))
            .collect();

        Self {
            profiles: BTreeMap::new(),
            histories: HashMap::new(),
            max_conversations,
            topics,
        }
    }

    /// Load a JSON array of profiles. Returns how many were loaded.
    pub async fn load_profiles(&mut self, path: &Path) -> Result<usize, RagError> {
        let raw = tokio::fs::read_to_string(path).await?;
        let profiles: Vec<UserProfile> = serde_json::from_str(&raw)?;
        let count = profiles.len();
        for profile in profiles {
            self.insert_profile(profile);
        }
        tracing::info!(profiles = count, path = %path.display(), "Loaded user profiles");
        Ok(count)
    }

    /// Load a JSON object of chat histories keyed by user id.
    pub async fn load_chat_histories(&mut self, path: &Path) -> Result<usize, RagError> {
        let raw = tokio::fs::read_to_string(path).await?;
        let histories: HashMap<String, ChatHistory> = serde_json::from_str(&raw)?;
        let count = histories.len();
        self.histories.extend(histories);
        tracing::info!(users = count, path = %path.display(), "Loaded chat histories");
        Ok(count)
    }

    pub fn insert_profile(&mut self, profile: UserProfile) {
        if profile.user_id.trim().is_empty() {
            tracing::warn!(name = %profile.name, "Profile without user_id, skipping");
            return;
        }
        self.profiles.insert(profile.user_id.clone(), profile);
    }

    pub fn insert_history(&mut self, user_id: impl Into<String>, history: ChatHistory) {
        self.histories.insert(user_id.into(), history);
    }

    pub fn profile(&self, user_id: &str) -> Option<&UserProfile> {
        self.profiles.get(user_id)
    }

    pub fn user_count(&self) -> usize {
        self.profiles.len()
    }

    fn metadata(user_id: &str, kind: &str, name: &str) -> Metadata {
        let mut m = Metadata::new();
        m.insert("user_id".to_string(), Value::String(user_id.to_string()));
        m.insert("type".to_string(), Value::String(kind.to_string()));
        m.insert("name".to_string(), Value::String(name.to_string()));
        m
    }

    fn put(m: &mut Metadata, key: &str, value: Option<Value>) {
        if let Some(v) = value.filter(|v| !v.is_null()) {
            m.insert(key.to_string(), v);
        }
    }

    /// Profile, preferences, trips, special requirements and goals.
    pub fn preference_chunks(&self, user_id: &str) -> Vec<Chunk> {
        let Some(profile) = self.profiles.get(user_id) else {
            return Vec::new();
        };
        let name = profile.name.as_str();
        let mut chunks = Vec::new();

        let age = profile
            .age
            .map(|a| a.to_string())
            .unwrap_or_else(|| "Unknown".to_string());
        chunks.push(Chunk::new(
            format!("{}_basic_profile", user_id),
            format!(
                "User: {}\nAge: {}\nLocation: {}\nLanguages: {}",
                name,
                age,
                or_unknown(&profile.location, "Unknown"),
                profile.languages.join(", ")
            ),
            Self::metadata(user_id, "basic_profile", name),
        ));

        let prefs = &profile.travel_preferences;
        let mut meta = Self::metadata(user_id, "travel_preferences", name);
        Self::put(&mut meta, "budget_range", prefs.budget_range.clone().map(Value::String));
        Self::put(&mut meta, "travel_style", prefs.travel_style.clone().map(Value::String));
        chunks.push(Chunk::new(
            format!("{}_travel_preferences", user_id),
            format!(
                "Travel Preferences for {}:\n- Budget Range: {}\n- Travel Style: {}\n- Accommodation Type: {}\n- Group Size: {}\n- Interests: {}",
                name,
                or_unknown(&prefs.budget_range, "Not specified"),
                or_unknown(&prefs.travel_style, "Not specified"),
                or_unknown(&prefs.accommodation_type, "Not specified"),
                value_text(&prefs.group_size, "Not specified"),
                prefs.interests.join(", ")
            ),
            meta,
        ));

        for (i, trip) in profile.past_trips.iter().enumerate() {
            let mut meta = Self::metadata(user_id, "past_trip", name);
            Self::put(&mut meta, "destination", trip.destination.clone().map(Value::String));
            Self::put(&mut meta, "year", trip.year.clone());
            Self::put(&mut meta, "purpose", trip.purpose.clone().map(Value::String));
            chunks.push(Chunk::new(
                format!("{}_trip_{}", user_id, i + 1),
                format!(
                    "Past Trip by {}:\nDestination: {}\nYear: {}\nPurpose: {}\nDuration: {}\nAccommodation: {}\nHighlights: {}",
                    name,
                    or_unknown(&trip.destination, "Unknown"),
                    value_text(&trip.year, "Unknown"),
                    or_unknown(&trip.purpose, "Unknown"),
                    or_unknown(&trip.duration, "Unknown"),
                    or_unknown(&trip.accommodation, "Unknown"),
                    trip.highlights.join(", ")
                ),
                meta,
            ));
        }

        let mut requirements = Vec::new();
        if !profile.dietary_restrictions.is_empty() {
            requirements.push(format!(
                "Dietary restrictions: {}",
                profile.dietary_restrictions.join(", ")
            ));
        }
        if let Some(needs) = profile.accessibility_needs.as_deref().filter(|n| !n.trim().is_empty()) {
            requirements.push(format!("Accessibility needs: {}", needs));
        }
        if !requirements.is_empty() {
            chunks.push(Chunk::new(
                format!("{}_special_requirements", user_id),
                format!("Special Requirements for {}:\n{}", name, requirements.join("\n")),
                Self::metadata(user_id, "special_requirements", name),
            ));
        }

        if !profile.travel_goals.is_empty() {
            chunks.push(Chunk::new(
                format!("{}_travel_goals", user_id),
                format!("Travel Goals for {}:\n{}", name, profile.travel_goals.join(", ")),
                Self::metadata(user_id, "travel_goals", name),
            ));
        }

        chunks
    }

    fn topics_of(&self, conversation: &Conversation) -> String {
        let all_text = conversation
            .messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join(" ");

        let found: Vec<&str> = self
            .topics
            .iter()
            .filter(|(_, re)| re.is_match(&all_text))
            .map(|(name, _)| *name)
            .collect();

        if found.is_empty() {
            "general travel discussion".to_string()
        } else {
            found.join(", ")
        }
    }

    /// Summaries of the most recent conversations that contain a user message.
    pub fn conversation_chunks(&self, user_id: &str) -> Vec<Chunk> {
        let Some(history) = self.histories.get(user_id) else {
            return Vec::new();
        };

        let name = history
            .user_profile
            .as_ref()
            .and_then(|p| p.get("name"))
            .and_then(|n| n.as_str())
            .or_else(|| self.profiles.get(user_id).map(|p| p.name.as_str()))
            .filter(|n| !n.is_empty())
            .unwrap_or("User");

        let skip = history.conversations.len().saturating_sub(self.max_conversations);
        let mut chunks = Vec::new();

        for (i, conversation) in history.conversations.iter().skip(skip).enumerate() {
            let questions: Vec<String> = conversation
                .messages
                .iter()
                .filter(|m| m.role == "user")
                .map(|m| {
                    if m.content.chars().count() > QUESTION_PREVIEW_CHARS {
                        let preview: String = m.content.chars().take(QUESTION_PREVIEW_CHARS).collect();
                        format!("- {}...", preview)
                    } else {
                        format!("- {}", m.content)
                    }
                })
                .collect();

            if questions.is_empty() {
                continue;
            }

            let date = conversation.date.as_deref().unwrap_or("Unknown");
            let mut meta = Self::metadata(user_id, "conversation_history", name);
            Self::put(&mut meta, "conversation_date", conversation.date.clone().map(Value::String));
            Self::put(&mut meta, "conversation_id", conversation.conversation_id.clone().map(Value::String));

            chunks.push(Chunk::new(
                format!("{}_conversation_{}", user_id, i + 1),
                format!(
                    "Recent Conversation with {} (Date: {}):\n\nUser Questions/Interests:\n{}\n\nKey Topics Discussed:\n{}",
                    name,
                    date,
                    questions.join("\n"),
                    self.topics_of(conversation)
                ),
                meta,
            ));
        }

        chunks
    }

    /// Every memory chunk for every known profile.
    pub fn all_chunks(&self) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        for user_id in self.profiles.keys() {
            chunks.extend(self.preference_chunks(user_id));
            chunks.extend(self.conversation_chunks(user_id));
        }
        tracing::info!(chunks = chunks.len(), users = self.profiles.len(), "Built memory chunks");
        chunks
    }

    /// Structured profile summary used at the top of personalized prompts.
    pub fn profile_summary(&self, user_id: &str) -> Option<String> {
        let profile = self.profiles.get(user_id)?;
        let prefs = &profile.travel_preferences;

        Some(format!(
            "Name: {}\nLocation: {}\n\nTravel Preferences:\n• Budget Range: {}\n• Travel Style: {}\n• Accommodation: {}\n• Group Size: {}\n• Key Interests: {}\n\nLanguages: {}\nDietary Restrictions: {}\nTravel Goals: {}",
            if profile.name.is_empty() { "Unknown" } else { profile.name.as_str() },
            or_unknown(&profile.location, "Unknown"),
            or_unknown(&prefs.budget_range, "Not specified"),
            or_unknown(&prefs.travel_style, "Not specified"),
            or_unknown(&prefs.accommodation_type, "Not specified"),
            value_text(&prefs.group_size, "Not specified"),
            join_or(&prefs.interests, "Not specified"),
            join_or(&profile.languages, "Not specified"),
            join_or(&profile.dietary_restrictions, "None"),
            join_or(&profile.travel_goals, "Not specified"),
        ))
    }
}
