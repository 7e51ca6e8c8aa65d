use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub travel_preferences: TravelPreferences,
    #[serde(default)]
    pub past_trips: Vec<PastTrip>,
    #[serde(default)]
    pub dietary_restrictions: Vec<String>,
    #[serde(default)]
    pub accessibility_needs: Option<String>,
    #[serde(default)]
    pub travel_goals: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TravelPreferences {
    pub budget_range: Option<String>,
    pub travel_style: Option<String>,
    pub accommodation_type: Option<String>,
    pub group_size: Option<serde_json::Value>,
    #[serde(default)]
    pub interests: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PastTrip {
    pub destination: Option<String>,
    pub year: Option<serde_json::Value>,
    pub purpose: Option<String>,
    pub duration: Option<String>,
    pub accommodation: Option<String>,
    #[serde(default)]
    pub highlights: Vec<String>,
}

/// One user's entry in the chat-history file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatHistory {
    #[serde(default)]
    pub conversations: Vec<Conversation>,
    #[serde(default)]
    pub user_profile: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conversation {
    pub conversation_id: Option<String>,
    pub date: Option<String>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}
