use rand::seq::SliceRandom;
use rand::Rng;

/// Behavioral trait bundle. Determined entirely by gamer type: two personas
/// of the same type differ only in name and demographics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraitBundle {
    pub spending_level: &'static str,
    pub time_investment: &'static str,
    pub purchase_timing: &'static str,
    pub information_seeking: &'static str,
    pub brand_loyalty: &'static str,
}

/// One archetype from the consumer-segmentation taxonomy, with its share of
/// the gamer population and a fixed trait bundle.
#[derive(Debug, Clone, Copy)]
pub struct GamerTypeProfile {
    pub key: &'static str,
    pub display_name: &'static str,
    pub proportion: f64,
    pub description: &'static str,
    pub traits: TraitBundle,
}

/// Segmentation shares sum to 1.0 across the eight types.
pub const GAMER_TYPES: [GamerTypeProfile; 8] = [
    GamerTypeProfile {
        key: "ultimate_gamer",
        display_name: "The Ultimate Gamer",
        proportion: 0.13,
        description: "Passionate gamer who spares neither money nor time on games.",
        traits: TraitBundle {
            spending_level: "Very High",
            time_investment: "20+ hours/week",
            purchase_timing: "Buys day one",
            information_seeking: "Buys regardless of reviews",
            brand_loyalty: "Very High",
        },
    },
    GamerTypeProfile {
        key: "all_round_enthusiast",
        display_name: "The All-Round Enthusiast",
        proportion: 0.09,
        description: "Enjoys every genre and keeps a balanced gaming life.",
        traits: TraitBundle {
            spending_level: "Medium-High",
            time_investment: "10-15 hours/week",
            purchase_timing: "Buys after checking reviews",
            information_seeking: "Reads reviews thoroughly",
            brand_loyalty: "Medium",
        },
    },
    GamerTypeProfile {
        key: "cloud_gamer",
        display_name: "The Cloud Gamer",
        proportion: 0.19,
        description: "No high-end PC; plays mostly streamed or discounted games.",
        traits: TraitBundle {
            spending_level: "Low-Medium",
            time_investment: "5-10 hours/week",
            purchase_timing: "Buys on deep discounts",
            information_seeking: "Checks optimization reviews",
            brand_loyalty: "Low",
        },
    },
    GamerTypeProfile {
        key: "conventional_player",
        display_name: "The Conventional Player",
        proportion: 0.04,
        description: "Replays familiar titles, little interest in new releases.",
        traits: TraitBundle {
            spending_level: "Very Low",
            time_investment: "5-10 hours/week",
            purchase_timing: "Rarely buys",
            information_seeking: "Indifferent",
            brand_loyalty: "N/A",
        },
    },
    GamerTypeProfile {
        key: "hardware_enthusiast",
        display_name: "The Hardware Enthusiast",
        proportion: 0.09,
        description: "Obsessed with the latest rigs and graphics; buys games as benchmarks.",
        traits: TraitBundle {
            spending_level: "Very High",
            time_investment: "15+ hours/week",
            purchase_timing: "Buys day one",
            information_seeking: "Studies graphics analyses",
            brand_loyalty: "Medium",
        },
    },
    GamerTypeProfile {
        key: "popcorn_gamer",
        display_name: "The Popcorn Gamer",
        proportion: 0.13,
        description: "Prefers watching gameplay over playing.",
        traits: TraitBundle {
            spending_level: "Very Low",
            time_investment: "20+ hours/week (watching)",
            purchase_timing: "Rarely buys",
            information_seeking: "Watches streams for vicarious play",
            brand_loyalty: "N/A",
        },
    },
    GamerTypeProfile {
        key: "backseat_gamer",
        display_name: "The Backseat Gamer",
        proportion: 0.06,
        description: "Used to play seriously, now only watches videos.",
        traits: TraitBundle {
            spending_level: "Very Low",
            time_investment: "5-10 hours/week (watching)",
            purchase_timing: "Does not buy",
            information_seeking: "Drawn by nostalgia",
            brand_loyalty: "Old franchises only",
        },
    },
    GamerTypeProfile {
        key: "time_filler",
        display_name: "The Time Filler",
        proportion: 0.27,
        description: "Plays mobile games in spare moments only.",
        traits: TraitBundle {
            spending_level: "Low",
            time_investment: "10-15 hours/week",
            purchase_timing: "Does not buy",
            information_seeking: "Mobile news only",
            brand_loyalty: "N/A",
        },
    },
];

const GENDER_DISTRIBUTION: [(&str, f64); 2] = [("Male", 0.54), ("Female", 0.46)];

const AGE_DISTRIBUTION: [(&str, (u8, u8), f64); 6] = [
    ("18-19", (18, 19), 0.04),
    ("20-29", (20, 29), 0.24),
    ("30-39", (30, 39), 0.26),
    ("40-49", (40, 49), 0.21),
    ("50-59", (50, 59), 0.17),
    ("60+", (60, 70), 0.08),
];

const OCCUPATIONS_BY_AGE: [(&str, &[&str]); 6] = [
    ("18-19", &["college student", "high school senior", "gap year student"]),
    (
        "20-29",
        &[
            "college student",
            "graduate student",
            "junior developer",
            "startup engineer",
            "freelancer",
            "content creator",
        ],
    ),
    (
        "30-39",
        &[
            "software team lead",
            "startup CTO",
            "freelance designer",
            "marketer",
            "accountant",
            "attorney",
        ],
    ),
    (
        "40-49",
        &[
            "department manager",
            "small business owner",
            "company director",
            "homemaker",
            "civil servant",
        ],
    ),
    (
        "50-59",
        &["executive", "small business owner", "preparing for retirement", "homemaker"],
    ),
    ("60+", &["retiree", "small business owner", "homemaker"]),
];

const SURNAMES: [&str; 12] = [
    "Smith", "Johnson", "Williams", "Brown", "Jones", "Garcia", "Miller", "Davis", "Martinez",
    "Lopez", "Wilson", "Anderson",
];

const MALE_NAMES: [&str; 10] = [
    "James", "Michael", "David", "Daniel", "Matthew", "Ethan", "Ryan", "Kevin", "Brandon", "Tyler",
];

const FEMALE_NAMES: [&str; 10] = [
    "Emma", "Olivia", "Sophia", "Emily", "Hannah", "Grace", "Chloe", "Mia", "Claire", "Rachel",
];

/// A synthetic consumer. Demographics are cosmetic; purchase behavior flows
/// from the gamer-type profile.
#[derive(Debug, Clone)]
pub struct Persona {
    pub id: String,
    pub name: String,
    pub gender: &'static str,
    pub age: u8,
    pub age_group: &'static str,
    pub occupation: &'static str,
    pub profile: &'static GamerTypeProfile,
}

impl Persona {
    /// Fixed first-person description embedded in every decision prompt.
    pub fn prompt_description(&self) -> String {
        let traits = &self.profile.traits;
        format!(
            "You are {name}, a {age}-year-old {gender}.\n\
             Occupation: {occupation}\n\
             [Gamer type: {type_name}]\n\
             {description}\n\n\
             [Traits]\n\
             - Spending: {spending}\n\
             - Information seeking: {seeking}",
            name = self.name,
            age = self.age,
            gender = self.gender.to_ascii_lowercase(),
            occupation = self.occupation,
            type_name = self.profile.display_name,
            description = self.profile.description,
            spending = traits.spending_level,
            seeking = traits.information_seeking,
        )
    }
}

pub fn profile_by_key(key: &str) -> Option<&'static GamerTypeProfile> {
    GAMER_TYPES.iter().find(|p| p.key == key)
}

fn weighted_choice<'a, T>(rng: &mut impl Rng, items: &'a [(T, f64)]) -> &'a T {
    let total: f64 = items.iter().map(|(_, w)| w).sum();
    let mut roll = rng.gen_range(0.0..total);
    for (item, weight) in items {
        if roll < *weight {
            return item;
        }
        roll -= weight;
    }
    &items[items.len() - 1].0
}

fn sample_age(rng: &mut impl Rng) -> (&'static str, u8) {
    let weights: Vec<((usize, &'static str, (u8, u8)), f64)> = AGE_DISTRIBUTION
        .iter()
        .enumerate()
        .map(|(i, (group, range, w))| ((i, *group, *range), *w))
        .collect();
    let (_, group, (low, high)) = *weighted_choice(rng, &weights);
    (group, rng.gen_range(low..=high))
}

fn occupations_for(age_group: &str) -> &'static [&'static str] {
    OCCUPATIONS_BY_AGE
        .iter()
        .find(|(group, _)| *group == age_group)
        .map(|(_, occupations)| *occupations)
        .unwrap_or(&["office worker"])
}

/// Sample one persona. When `gamer_type` is `None` the type is drawn from
/// the population distribution.
pub fn generate_persona(rng: &mut impl Rng, id: String, gamer_type: Option<&str>) -> Persona {
    let gender = *weighted_choice(rng, &GENDER_DISTRIBUTION);
    let (age_group, age) = sample_age(rng);

    let profile = match gamer_type.and_then(profile_by_key) {
        Some(profile) => profile,
        None => {
            let weights: Vec<(&'static GamerTypeProfile, f64)> =
                GAMER_TYPES.iter().map(|p| (p, p.proportion)).collect();
            *weighted_choice(rng, &weights)
        }
    };

    let given = if gender == "Male" {
        MALE_NAMES.choose(rng).expect("name list is non-empty")
    } else {
        FEMALE_NAMES.choose(rng).expect("name list is non-empty")
    };
    let surname = SURNAMES.choose(rng).expect("surname list is non-empty");
    let occupation = occupations_for(age_group)
        .choose(rng)
        .expect("occupation list is non-empty");

    Persona {
        id,
        name: format!("{} {}", given, surname),
        gender,
        age,
        age_group,
        occupation,
        profile,
    }
}

/// `n_per_type` personas for each of the eight gamer types, ids
/// `{gamer_type}_{i}`. Balanced panels keep every archetype represented at
/// equal weight in the daily ratio.
pub fn generate_balanced_personas(rng: &mut impl Rng, n_per_type: usize) -> Vec<Persona> {
    let mut personas = Vec::with_capacity(GAMER_TYPES.len() * n_per_type);
    for profile in &GAMER_TYPES {
        for i in 0..n_per_type {
            let id = format!("{}_{}", profile.key, i + 1);
            personas.push(generate_persona(rng, id, Some(profile.key)));
        }
    }
    personas
}
