//! Task category routing.

use crate::model::{TaskCategory, Track};

/// Map a task category to its generation track.
///
/// `None` means the category is unrouted: the run ends without calling the
/// generation service and without an error.
pub fn route(category: &TaskCategory) -> Option<Track> {
    match category {
        TaskCategory::Python | TaskCategory::Javascript | TaskCategory::Flutter => {
            Some(Track::Programming)
        }
        TaskCategory::Graphviz => Some(Track::Diagram),
        TaskCategory::Pytm => Some(Track::ThreatModel),
        TaskCategory::Other(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route_str(s: &str) -> Option<Track> {
        route(&s.parse().unwrap())
    }

    #[test]
    fn programming_languages_route_to_programming() {
        for category in ["python", "javascript", "flutter"] {
            assert_eq!(route_str(category), Some(Track::Programming), "{category}");
        }
    }

    #[test]
    fn graphviz_and_pytm_have_their_own_tracks() {
        assert_eq!(route_str("graphviz"), Some(Track::Diagram));
        assert_eq!(route_str("pytm"), Some(Track::ThreatModel));
    }

    #[test]
    fn unknown_categories_are_unrouted() {
        for category in ["unknown_value", "general", "", "rust"] {
            assert_eq!(route_str(category), None, "{category}");
        }
    }

    #[test]
    fn routing_is_deterministic() {
        for category in ["python", "graphviz", "pytm", "flutter", "nope"] {
            let c: TaskCategory = category.parse().unwrap();
            assert_eq!(route(&c), route(&c));
        }
    }
}
