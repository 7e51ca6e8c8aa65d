//! Prompt templates and the fixed strings served when generation comes up short.

pub const MISSING_CHUNK_TEXT: &str = "[Text data missing for this chunk ID]";

pub const RAG_MISS_FALLBACK: &str =
    "I can try to answer generally, but I couldn't find specific information in the travel documents.";

pub const EMPTY_GROUNDED_FALLBACK: &str = "I received a response, but it was empty. Based on the documents, I found some information but couldn't synthesize a specific answer.";

pub const GENERATION_APOLOGY: &str =
    "I'm sorry, I couldn't generate a response right now. Please try again.";

pub const PERSONALIZED_APOLOGY: &str =
    "I encountered an error while trying to generate a personalized response. Please try again.";

pub const EMPTY_PERSONALIZED_FALLBACK: &str = "I couldn't put together a personalized answer this time. Could you tell me a bit more about what you're looking for?";

pub const NO_PROFILE: &str = "No profile information available.";
pub const NO_USER_CONTEXT: &str = "No previous travel experience or interests on record.";
pub const NO_TRAVEL_CONTEXT: &str = "No relevant travel information available.";

const DOCUMENT_TEMPLATE: &str = "\
You are an expert and friendly AI travel assistant specializing in Buenos Aires.
Your knowledge about specific hotels, their features, and locations comes ONLY from the following retrieved context from local travel documents.

Please answer the user's query based on this context.

- If the context provides specific names (e.g., hotel names from the 'From hotel ...' prefix in the context), please try to use them in your answer.
- If the context contains relevant information to answer the query, synthesize it into a helpful and concise response.
- If the context does not provide enough information to directly answer the query, clearly state that the provided documents don't have the specific details. You may then offer a more general travel-related answer if appropriate, but clearly distinguish this general advice from information found in the documents.
- Do not make up information or details not present in the provided context.

Context from travel documents:
---------------------
{context}
---------------------

User's Query: {query}

Assistant's Answer:";

const PERSONALIZED_TEMPLATE: &str = "\
You are an expert and friendly AI travel assistant specializing in Buenos Aires.
Your task is to provide personalized travel recommendations based on the user's profile and preferences.

User Profile and Preferences:
{profile}

Previous Travel Experience and Interests:
{user_context}

Relevant Travel Information:
{travel_context}

Important Instructions:
1. Use the user's known preferences (budget, interests, travel style) to tailor your recommendations
2. Reference their past travel experiences when relevant
3. If you don't have specific information about something, acknowledge what you do know about their preferences
4. Keep your tone friendly and conversational, as if continuing an ongoing discussion
5. If this is your first interaction, briefly acknowledge their preferences but still ask for any specific requirements for this trip

Based on this information, please provide a personalized response to: \"{query}\"
";

/// Substitute every `{name}` in `template` in one pass, so braces inside the
/// values are copied through untouched. Unknown names stay as written.
fn fill(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open..];
        let value = tail.find('}').and_then(|close| {
            let name = &tail[1..close];
            values
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (*value, close))
        });
        match value {
            Some((value, close)) => {
                out.push_str(value);
                rest = &tail[close + 1..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

pub fn document_prompt(context: &str, query: &str) -> String {
    fill(DOCUMENT_TEMPLATE, &[("context", context), ("query", query)])
}

/// Empty sections are replaced by their placeholders.
pub fn personalized_prompt(
    profile: &str,
    user_context: &str,
    travel_context: &str,
    query: &str,
) -> String {
    let or = |s: &str, placeholder: &str| {
        if s.trim().is_empty() {
            placeholder.to_string()
        } else {
            s.to_string()
        }
    };
    let profile = or(profile, NO_PROFILE);
    let user_context = or(user_context, NO_USER_CONTEXT);
    let travel_context = or(travel_context, NO_TRAVEL_CONTEXT);
    fill(
        PERSONALIZED_TEMPLATE,
        &[
            ("profile", profile.as_str()),
            ("user_context", user_context.as_str()),
            ("travel_context", travel_context.as_str()),
            ("query", query),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_prompt_embeds_context_and_query() {
        let p = document_prompt("From hotel 'Alvear' (chunk: a_chunk_0):\nLuxury", "Where to stay?");
        assert!(p.contains("From hotel 'Alvear'"));
        assert!(p.contains("User's Query: Where to stay?"));
        assert!(!p.contains("{context}"));
    }

    #[test]
    fn test_personalized_prompt_uses_placeholders_for_missing_sections() {
        let p = personalized_prompt("", "", "Hotel info", "Any tips?");
        assert!(p.contains(NO_PROFILE));
        assert!(p.contains(NO_USER_CONTEXT));
        assert!(!p.contains(NO_TRAVEL_CONTEXT));
        assert!(p.contains("\"Any tips?\""));
    }

    #[test]
    fn test_braces_in_context_are_not_substituted() {
        let p = document_prompt("Menu lists {query} and {context} verbatim", "Best steak?");
        assert!(p.contains("Menu lists {query} and {context} verbatim"));
        assert!(p.contains("User's Query: Best steak?"));
        assert_eq!(p.matches("Best steak?").count(), 1);
    }

    #[test]
    fn test_braces_in_personal_sections_survive() {
        let p = personalized_prompt(
            "Nickname: {travel_context}",
            "Wrote a blog titled {query}",
            "Hotel info",
            "Plans for {profile}?",
        );
        assert!(p.contains("Nickname: {travel_context}"));
        assert!(p.contains("Wrote a blog titled {query}"));
        assert!(p.contains("\"Plans for {profile}?\""));
        assert_eq!(p.matches("Hotel info").count(), 1);
    }
}
