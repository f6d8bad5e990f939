//! Validated value types shared across the triage workspace.
//!
//! Everything here is a closed vocabulary that crosses a wire boundary (webhook payloads, the
//! live dashboard stream, the store, collaborator output). Labels are the exact strings the
//! dashboard renders, so they are defined once and reused for serde, `Display` and `FromStr`.

/// Errors that can occur when creating validated text types.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TextError {
    /// The input text was empty or contained only whitespace
    #[error("Text cannot be empty")]
    Empty,
    /// The input did not match any label of a closed vocabulary
    #[error("unknown {kind} label: {value:?}")]
    UnknownLabel { kind: &'static str, value: String },
}

/// A string type that guarantees non-empty content.
///
/// This type wraps a `String` and ensures it contains at least one non-whitespace character.
/// The input is automatically trimmed of leading and trailing whitespace during construction.
/// Transcript lines carry their text as `NonEmptyText`, so an empty utterance is
/// unrepresentable once it has passed the ingress boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NonEmptyText(String);

impl NonEmptyText {
    /// Creates a new `NonEmptyText` from the given input.
    ///
    /// # Returns
    ///
    /// Returns `Ok(NonEmptyText)` if the trimmed input is non-empty,
    /// or `Err(TextError::Empty)` if it's empty or contains only whitespace.
    pub fn new(input: impl AsRef<str>) -> Result<Self, TextError> {
        let trimmed = input.as_ref().trim();
        if trimmed.is_empty() {
            return Err(TextError::Empty);
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Returns the inner string as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for NonEmptyText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for NonEmptyText {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl serde::Serialize for NonEmptyText {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for NonEmptyText {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        NonEmptyText::new(&s).map_err(serde::de::Error::custom)
    }
}

/// Declares a closed label vocabulary with matching serde, `Display` and `FromStr` impls.
macro_rules! labelled_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident => $label:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash,
            serde::Serialize, serde::Deserialize, utoipa::ToSchema,
        )]
        pub enum $name {
            $( $(#[$vmeta])* #[serde(rename = $label)] $variant, )+
        }

        impl $name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// The wire label of this variant.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $( $name::$variant => $label, )+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = TextError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $label => Ok($name::$variant), )+
                    other => Err(TextError::UnknownLabel {
                        kind: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

labelled_enum! {
    /// Who said a transcript line.
    pub enum Speaker {
        Agent => "Agent",
        Caller => "Caller",
    }
}

impl Speaker {
    /// Maps a provider role to a speaker: `user` is the caller, every other role is the agent.
    pub fn from_role(role: &str) -> Self {
        if role == "user" {
            Speaker::Caller
        } else {
            Speaker::Agent
        }
    }
}

labelled_enum! {
    /// Urgency classification of a call or a patient.
    pub enum TriageLevel {
        High => "HIGH",
        Med => "MED",
        Low => "LOW",
    }
}

impl Default for TriageLevel {
    fn default() -> Self {
        TriageLevel::Med
    }
}

labelled_enum! {
    /// Status of a call record. `Live` only appears on stub rows; ended calls carry one of the
    /// three terminal statuses.
    pub enum CallStatus {
        Live => "Live",
        NeedsReview => "Needs review",
        Escalated => "Escalated",
        Resolved => "Resolved",
    }
}

impl CallStatus {
    /// Statuses an operator may assign to an ended call.
    pub const TERMINAL: &'static [CallStatus] = &[
        CallStatus::NeedsReview,
        CallStatus::Escalated,
        CallStatus::Resolved,
    ];

    pub fn is_terminal(&self) -> bool {
        !matches!(self, CallStatus::Live)
    }
}

impl Default for CallStatus {
    fn default() -> Self {
        CallStatus::NeedsReview
    }
}

labelled_enum! {
    pub enum PatientStatus {
        Critical => "Critical",
        Active => "Active",
        Stable => "Stable",
        FollowUpNeeded => "Follow-up needed",
    }
}

impl Default for PatientStatus {
    fn default() -> Self {
        PatientStatus::Active
    }
}

labelled_enum! {
    pub enum Sex {
        M => "M",
        F => "F",
    }
}

labelled_enum! {
    pub enum ConditionStatus {
        Active => "Active",
        Resolved => "Resolved",
        Chronic => "Chronic",
    }
}

impl Default for ConditionStatus {
    fn default() -> Self {
        ConditionStatus::Active
    }
}

labelled_enum! {
    /// Severity of a symptom reported during an encounter.
    pub enum Severity {
        Mild => "Mild",
        Moderate => "Moderate",
        Severe => "Severe",
    }
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Moderate
    }
}
