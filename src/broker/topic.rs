use crate::utils::BusError;

/// Pattern that subscribes to every topic on the bus.
pub const GLOBAL_WILDCARD: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq)]
enum PatternSegment {
    /// Matches exactly one topic segment, whatever its value.
    Any,
    /// Matches one topic segment with this exact value.
    Literal(String),
}

/// A parsed subscription pattern.
///
/// Topics are dot-separated segment chains (`sensor.kitchen.temp`). A
/// pattern segment of `*` matches exactly one segment of the topic, so
/// `sensor.*.temp` matches `sensor.kitchen.temp` but not `sensor.temp`
/// or `sensor.kitchen.temp.raw`. The sole pattern `*` is the global
/// wildcard and matches every topic.
///
/// Patterns are parsed once at subscribe time; matching is a straight
/// segment walk with no further allocation.
#[derive(Debug, Clone)]
pub struct TopicPattern {
    raw: String,
    segments: Vec<PatternSegment>,
    global: bool,
}

impl TopicPattern {
    /// Parses a subscription pattern.
    ///
    /// Rejects empty patterns and patterns with empty segments (leading,
    /// trailing or doubled dots). A `*` embedded inside a segment, such as
    /// `foo*`, is treated as a literal, not a wildcard.
    pub fn parse(raw: &str) -> Result<Self, BusError> {
        if raw.is_empty() {
            return Err(BusError::SubscriptionInvalid {
                pattern: raw.to_string(),
                reason: "pattern is empty".to_string(),
            });
        }

        if raw == GLOBAL_WILDCARD {
            return Ok(Self {
                raw: raw.to_string(),
                segments: Vec::new(),
                global: true,
            });
        }

        let mut segments = Vec::new();
        for part in raw.split('.') {
            if part.is_empty() {
                return Err(BusError::SubscriptionInvalid {
                    pattern: raw.to_string(),
                    reason: "pattern has an empty segment".to_string(),
                });
            }
            if part == GLOBAL_WILDCARD {
                segments.push(PatternSegment::Any);
            } else {
                segments.push(PatternSegment::Literal(part.to_string()));
            }
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
            global: false,
        })
    }

    /// The pattern as originally written.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Whether this is the global wildcard pattern `*`.
    pub fn is_global(&self) -> bool {
        self.global
    }

    /// Tests a concrete topic against this pattern.
    ///
    /// Segment counts must agree: `*` never spans more than one segment.
    pub fn matches(&self, topic: &str) -> bool {
        if self.global {
            return true;
        }

        let mut expected = self.segments.iter();
        for part in topic.split('.') {
            match expected.next() {
                Some(PatternSegment::Any) => {}
                Some(PatternSegment::Literal(lit)) if lit == part => {}
                _ => return false,
            }
        }
        expected.next().is_none()
    }
}

/// Validates a concrete topic name for publishing.
///
/// Topics must be non-empty, free of empty segments and free of `*`
/// anywhere: wildcards belong to subscription patterns only.
pub fn validate_topic(topic: &str) -> Result<(), BusError> {
    if topic.is_empty() {
        return Err(BusError::MessageInvalid("topic is empty".to_string()));
    }
    for part in topic.split('.') {
        if part.is_empty() {
            return Err(BusError::MessageInvalid(format!(
                "topic '{topic}' has an empty segment"
            )));
        }
        if part.contains('*') {
            return Err(BusError::MessageInvalid(format!(
                "topic '{topic}' contains a wildcard"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(raw: &str) -> TopicPattern {
        TopicPattern::parse(raw).expect("pattern should parse")
    }

    #[test]
    fn exact_topic_matches_itself() {
        assert!(pattern("sensor.kitchen.temp").matches("sensor.kitchen.temp"));
    }

    #[test]
    fn exact_topic_rejects_other_topics() {
        let p = pattern("sensor.kitchen.temp");
        assert!(!p.matches("sensor.kitchen.humidity"));
        assert!(!p.matches("sensor.kitchen"));
        assert!(!p.matches("sensor.kitchen.temp.raw"));
    }

    #[test]
    fn wildcard_matches_exactly_one_segment() {
        let p = pattern("sensor.*.temp");
        assert!(p.matches("sensor.kitchen.temp"));
        assert!(p.matches("sensor.garage.temp"));
        assert!(!p.matches("sensor.temp"));
        assert!(!p.matches("sensor.kitchen.door.temp"));
    }

    #[test]
    fn wildcard_in_first_and_last_position() {
        assert!(pattern("*.kitchen.temp").matches("sensor.kitchen.temp"));
        assert!(pattern("sensor.kitchen.*").matches("sensor.kitchen.temp"));
        assert!(!pattern("sensor.kitchen.*").matches("sensor.kitchen"));
    }

    #[test]
    fn multiple_wildcards_each_bind_one_segment() {
        let p = pattern("*.*.temp");
        assert!(p.matches("sensor.kitchen.temp"));
        assert!(!p.matches("temp"));
        assert!(!p.matches("a.b.c.temp"));
    }

    #[test]
    fn global_wildcard_matches_everything() {
        let p = pattern("*");
        assert!(p.is_global());
        assert!(p.matches("a"));
        assert!(p.matches("a.b.c"));
        assert!(p.matches("$control.router"));
    }

    #[test]
    fn star_inside_segment_is_literal() {
        let p = pattern("foo*.bar");
        assert!(p.matches("foo*.bar"));
        assert!(!p.matches("foobar.bar"));
        assert!(!p.matches("fooX.bar"));
    }

    #[test]
    fn empty_and_malformed_patterns_are_rejected() {
        assert!(TopicPattern::parse("").is_err());
        assert!(TopicPattern::parse(".").is_err());
        assert!(TopicPattern::parse("a..b").is_err());
        assert!(TopicPattern::parse(".a").is_err());
        assert!(TopicPattern::parse("a.").is_err());
    }

    #[test]
    fn topic_validation_rejects_wildcards_and_empty_segments() {
        assert!(validate_topic("sensor.kitchen.temp").is_ok());
        assert!(validate_topic("$control.router").is_ok());
        assert!(validate_topic("").is_err());
        assert!(validate_topic("a..b").is_err());
        assert!(validate_topic("sensor.*").is_err());
        assert!(validate_topic("*").is_err());
    }
}
