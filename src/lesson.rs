use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignKind {
    /// Held hand shape
    Static,
    /// Sign that involves motion
    Dynamic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LessonCategory {
    Alphabet,
    Phrase,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lesson {
    pub id: String,
    pub category: LessonCategory,
    pub kind: SignKind,
    /// Display title, e.g. "A" or "Thank You"
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub instruction: Option<String>,
    pub difficulty: Difficulty,
}

impl Lesson {
    pub fn new(id: &str, title: &str, description: &str, kind: SignKind) -> Self {
        Self {
            id: id.to_string(),
            category: LessonCategory::Custom,
            kind,
            title: title.to_string(),
            description: description.to_string(),
            instruction: None,
            difficulty: Difficulty::Medium,
        }
    }
}

const EASY_LETTERS: &str = "ABCEFILOUV";

/// Fingerspelling A–Z; J and Z are traced in the air
pub fn alphabet_lessons() -> Vec<Lesson> {
    ('A'..='Z')
        .map(|c| {
            let (kind, description) = match c {
                'J' | 'Z' => (SignKind::Dynamic, format!("Trace a '{}' in the air.", c)),
                _ => (SignKind::Static, format!("Sign for letter {}", c)),
            };
            Lesson {
                id: format!("alpha-{}", c),
                category: LessonCategory::Alphabet,
                kind,
                title: c.to_string(),
                description,
                instruction: None,
                difficulty: if EASY_LETTERS.contains(c) {
                    Difficulty::Easy
                } else {
                    Difficulty::Medium
                },
            }
        })
        .collect()
}

pub fn phrase_lessons() -> Vec<Lesson> {
    [
        ("p1", "Thank You", "Hand moves from chin forward.", Difficulty::Easy),
        ("p2", "Please", "Circular motion on chest.", Difficulty::Easy),
        ("p3", "Help", "Fist on palm, lifting up.", Difficulty::Medium),
        ("p4", "Yes", "Fist nodding like a head.", Difficulty::Easy),
        ("p5", "No", "Index/Middle tap thumb.", Difficulty::Easy),
        ("p6", "Hello", "Salute from forehead.", Difficulty::Easy),
    ]
    .into_iter()
    .map(|(id, title, description, difficulty)| Lesson {
        id: id.to_string(),
        category: LessonCategory::Phrase,
        kind: SignKind::Dynamic,
        title: title.to_string(),
        description: description.to_string(),
        instruction: None,
        difficulty,
    })
    .collect()
}

/// Ordered lessons of one practice run
#[derive(Debug, Clone, Default)]
pub struct LessonQueue {
    lessons: VecDeque<Lesson>,
}

impl LessonQueue {
    pub fn new(lessons: impl IntoIterator<Item = Lesson>) -> Self {
        Self {
            lessons: lessons.into_iter().collect(),
        }
    }

    pub fn current(&self) -> Option<&Lesson> {
        self.lessons.front()
    }

    pub fn has_next(&self) -> bool {
        self.lessons.len() > 1
    }

    /// Drop the current lesson; returns the next one
    pub fn advance(&mut self) -> Option<&Lesson> {
        self.lessons.pop_front();
        self.lessons.front()
    }

    /// Jump to `lesson` in place of the current one; the rest of the run is kept
    pub fn replace_current(&mut self, lesson: Lesson) {
        self.lessons.pop_front();
        self.lessons.push_front(lesson);
    }

    pub fn len(&self) -> usize {
        self.lessons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lessons.is_empty()
    }
}
