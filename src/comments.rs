//! Report card comment generation. Band selection is a pure function of
//! the average and class position; only the within-band sentence choice
//! draws from the injected [`RandomSource`].

pub const OPTION_DRAWS: usize = 5;
const OPTION_REDRAW_BUDGET: usize = 20;

/// Source of within-band draws. Injected so callers can pin selections.
pub trait RandomSource {
    /// Uniform index in `0..bound`. `bound` is never 0 for the pools here.
    fn next_index(&mut self, bound: usize) -> usize;
}

/// OS-entropy source used for live comment generation.
#[derive(Debug, Default)]
pub struct EntropyRandom;

impl RandomSource for EntropyRandom {
    fn next_index(&mut self, bound: usize) -> usize {
        if bound <= 1 {
            return 0;
        }
        let mut buf = [0u8; 8];
        if getrandom::fill(&mut buf).is_err() {
            return 0;
        }
        (u64::from_le_bytes(buf) % bound as u64) as usize
    }
}

/// Deterministic xorshift64* source for reproducible draws.
#[derive(Debug, Clone)]
pub struct SeededRandom {
    state: u64,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            state: seed.max(1),
        }
    }
}

impl RandomSource for SeededRandom {
    fn next_index(&mut self, bound: usize) -> usize {
        if bound <= 1 {
            return 0;
        }
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        (x.wrapping_mul(0x2545_F491_4F6C_DD1D) % bound as u64) as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerformanceBand {
    Excellent,
    VeryGood,
    Good,
    Average,
    BelowAverage,
    Poor,
}

impl PerformanceBand {
    pub fn from_average(average: f64) -> Self {
        if average >= 80.0 {
            Self::Excellent
        } else if average >= 70.0 {
            Self::VeryGood
        } else if average >= 60.0 {
            Self::Good
        } else if average >= 50.0 {
            Self::Average
        } else if average >= 40.0 {
            Self::BelowAverage
        } else {
            Self::Poor
        }
    }

    fn performance_pool(self) -> &'static [&'static str] {
        match self {
            Self::Excellent => &[
                "An outstanding performance this term.",
                "Excellent result; a truly remarkable term's work.",
                "Superb grasp of the term's work across all subjects.",
                "A brilliant performance worthy of emulation.",
            ],
            Self::VeryGood => &[
                "A very good performance this term.",
                "Very good result with consistent effort shown.",
                "A strong showing across most subjects.",
                "Commendable work; the results speak for themselves.",
            ],
            Self::Good => &[
                "A good performance with room to climb higher.",
                "Good result; steady progress is evident.",
                "A solid term's work overall.",
                "Good effort shown in most subjects.",
            ],
            Self::Average => &[
                "A fair performance; more effort is required.",
                "An average result that can certainly improve.",
                "Satisfactory work, though well below full potential.",
                "Average performance this term; aim higher.",
            ],
            Self::BelowAverage => &[
                "A below average performance this term.",
                "The result falls short of the class expectation.",
                "Performance is below par and needs attention.",
                "A weak term's result; considerable effort is needed.",
            ],
            Self::Poor => &[
                "A poor performance this term.",
                "A very weak result across the subjects.",
                "The term's work shows serious difficulty.",
                "An unsatisfactory result overall.",
            ],
        }
    }

    fn feedback_pool(self) -> &'static [&'static str] {
        match self {
            Self::Excellent => &[
                "Keep up this excellent standard.",
                "Maintain this momentum next term.",
                "Continue to lead by example.",
                "Do not relent; the sky is the limit.",
            ],
            Self::VeryGood => &[
                "A little more push will place you among the very best.",
                "Keep working hard to reach the top band.",
                "Sustain the effort and aim for excellence.",
                "With steady focus the top grade is within reach.",
            ],
            Self::Good => &[
                "More consistent revision will lift the weaker subjects.",
                "Put extra time into the subjects that lag behind.",
                "Greater attention in class will raise this further.",
                "Build on this foundation with regular practice.",
            ],
            Self::Average => &[
                "Regular study habits will improve this result.",
                "Seek help early in subjects that prove difficult.",
                "More seriousness with assignments is required.",
                "Focused revision before tests will pay off.",
            ],
            Self::BelowAverage => &[
                "Extra lessons and close supervision are advised.",
                "A structured study timetable is strongly recommended.",
                "Parents should encourage daily home revision.",
                "Attend classes punctually and complete all assignments.",
            ],
            Self::Poor => &[
                "Urgent remedial support is required.",
                "Close guidance at home and in school is essential.",
                "A meeting with the class teacher is recommended.",
                "Serious and immediate change in study habits is needed.",
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionBand {
    Top,
    Upper,
    Middle,
    Lower,
}

impl PositionBand {
    pub fn from_position(position: usize, total_students: usize) -> Self {
        let total = total_students.max(1);
        let percentage = position as f64 / total as f64 * 100.0;
        if percentage <= 10.0 {
            Self::Top
        } else if percentage <= 30.0 {
            Self::Upper
        } else if percentage <= 70.0 {
            Self::Middle
        } else {
            Self::Lower
        }
    }

    fn pool(self) -> &'static [&'static str] {
        match self {
            Self::Top => &[
                "Placed among the very best in the class.",
                "An enviable position at the top of the class.",
                "One of the leading lights of the class this term.",
                "A top-of-the-class placement, well earned.",
            ],
            Self::Upper => &[
                "Placed comfortably in the upper part of the class.",
                "A strong position within the class.",
                "Ranked well above the middle of the class.",
                "An upper-band placement this term.",
            ],
            Self::Middle => &[
                "Placed around the middle of the class.",
                "A mid-table position with clear room to rise.",
                "Ranked within the main body of the class.",
                "A middle-band placement this term.",
            ],
            Self::Lower => &[
                "Placed in the lower part of the class.",
                "The class position calls for determined improvement.",
                "Ranked near the bottom of the class this term.",
                "A lower-band placement that must improve.",
            ],
        }
    }
}

fn pick<'a>(pool: &'a [&'static str], rng: &mut dyn RandomSource) -> &'a str {
    pool[rng.next_index(pool.len()).min(pool.len() - 1)]
}

/// One class-teacher comment: performance sentence + position sentence +
/// constructive feedback keyed by the performance band, space joined.
pub fn generate_class_teacher_comment(
    average: f64,
    position: usize,
    total_students: usize,
    rng: &mut dyn RandomSource,
) -> String {
    let performance = PerformanceBand::from_average(average);
    let placement = PositionBand::from_position(position, total_students);
    format!(
        "{} {} {}",
        pick(performance.performance_pool(), rng),
        pick(placement.pool(), rng),
        pick(performance.feedback_pool(), rng),
    )
}

/// Five independent draws, de-duplicated. Redraws until at least 3 unique
/// options exist, within a fixed budget; once the budget is spent the raw
/// draws are returned, duplicates and all.
pub fn generate_comment_options(
    average: f64,
    position: usize,
    total_students: usize,
    rng: &mut dyn RandomSource,
) -> Vec<String> {
    let draws: Vec<String> = (0..OPTION_DRAWS)
        .map(|_| generate_class_teacher_comment(average, position, total_students, rng))
        .collect();
    let mut unique: Vec<String> = Vec::new();
    for d in &draws {
        if !unique.contains(d) {
            unique.push(d.clone());
        }
    }
    let mut redraws = 0;
    while unique.len() < 3 && redraws < OPTION_REDRAW_BUDGET {
        let d = generate_class_teacher_comment(average, position, total_students, rng);
        if !unique.contains(&d) {
            unique.push(d);
        }
        redraws += 1;
    }
    if unique.len() < 3 {
        draws
    } else {
        unique
    }
}

/// Principal's remark: a fixed sentence per average band, no randomness.
pub fn principal_comment(average: f64) -> &'static str {
    if average >= 80.0 {
        "An excellent result. Keep flying the school's flag high."
    } else if average >= 65.0 {
        "A very good result. Keep up the good work."
    } else if average >= 50.0 {
        "A fair result. There is room for improvement."
    } else if average >= 40.0 {
        "Work much harder next term."
    } else {
        "A poor result. Serious improvement is required."
    }
}
