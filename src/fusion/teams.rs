//! Seed registry of Division I programs.
//!
//! Each entry carries the canonical id, display name, mascot, conference and
//! the first season the program played Division I basketball. Aliases listed
//! here are global (valid for every source). An alias shared by several
//! programs ("Miami", "Loyola") is registered on each of them so
//! resolution reports it as ambiguous unless context decides.

use std::collections::HashMap;

use crate::db::models::TeamId;

pub struct SeedTeam {
    pub id: &'static str,
    pub name: &'static str,
    pub mascot: &'static str,
    pub conference: &'static str,
    pub first_season: u16,
    pub aliases: &'static [&'static str],
}

const fn team(
    id: &'static str,
    name: &'static str,
    mascot: &'static str,
    conference: &'static str,
    aliases: &'static [&'static str],
) -> SeedTeam {
    SeedTeam {
        id,
        name,
        mascot,
        conference,
        first_season: 1948,
        aliases,
    }
}

pub const SEED_TEAMS: &[SeedTeam] = &[
    // ACC
    team("duke", "Duke", "Blue Devils", "ACC", &[]),
    team("north-carolina", "North Carolina", "Tar Heels", "ACC", &["UNC", "N Carolina"]),
    team("nc-state", "NC State", "Wolfpack", "ACC", &["North Carolina State", "N.C. State"]),
    team("virginia", "Virginia", "Cavaliers", "ACC", &["UVA"]),
    team("virginia-tech", "Virginia Tech", "Hokies", "ACC", &["VT"]),
    team("miami-fl", "Miami (FL)", "Hurricanes", "ACC", &["Miami FL", "Miami Florida", "Miami"]),
    team("louisville", "Louisville", "Cardinals", "ACC", &[]),
    team("syracuse", "Syracuse", "Orange", "ACC", &["Cuse"]),
    team("clemson", "Clemson", "Tigers", "ACC", &[]),
    team("wake-forest", "Wake Forest", "Demon Deacons", "ACC", &["Wake"]),
    team("pittsburgh", "Pittsburgh", "Panthers", "ACC", &["Pitt"]),
    team("boston-college", "Boston College", "Eagles", "ACC", &["BC"]),
    team("florida-state", "Florida State", "Seminoles", "ACC", &["FSU"]),
    team("georgia-tech", "Georgia Tech", "Yellow Jackets", "ACC", &["GT"]),
    team("notre-dame", "Notre Dame", "Fighting Irish", "ACC", &[]),
    team("smu", "SMU", "Mustangs", "ACC", &["Southern Methodist"]),
    team("stanford", "Stanford", "Cardinal", "ACC", &[]),
    team("california", "California", "Golden Bears", "ACC", &["Cal"]),
    // Big East
    team("connecticut", "Connecticut", "Huskies", "Big East", &["UConn"]),
    team("villanova", "Villanova", "Wildcats", "Big East", &["Nova"]),
    team("marquette", "Marquette", "Golden Eagles", "Big East", &[]),
    team("creighton", "Creighton", "Bluejays", "Big East", &[]),
    team("st-johns", "St. John's", "Red Storm", "Big East", &["Saint John's", "St Johns NY"]),
    team("xavier", "Xavier", "Musketeers", "Big East", &[]),
    team("butler", "Butler", "Bulldogs", "Big East", &[]),
    team("providence", "Providence", "Friars", "Big East", &[]),
    team("seton-hall", "Seton Hall", "Pirates", "Big East", &[]),
    team("georgetown", "Georgetown", "Hoyas", "Big East", &[]),
    team("depaul", "DePaul", "Blue Demons", "Big East", &[]),
    // Big 12
    team("kansas", "Kansas", "Jayhawks", "Big 12", &["KU"]),
    team("kansas-state", "Kansas State", "Wildcats", "Big 12", &["K-State"]),
    team("houston", "Houston", "Cougars", "Big 12", &[]),
    team("iowa-state", "Iowa State", "Cyclones", "Big 12", &[]),
    team("baylor", "Baylor", "Bears", "Big 12", &[]),
    team("texas-tech", "Texas Tech", "Red Raiders", "Big 12", &["TTU"]),
    team("byu", "BYU", "Cougars", "Big 12", &["Brigham Young"]),
    team("arizona", "Arizona", "Wildcats", "Big 12", &[]),
    team("arizona-state", "Arizona State", "Sun Devils", "Big 12", &["ASU"]),
    team("cincinnati", "Cincinnati", "Bearcats", "Big 12", &[]),
    team("tcu", "TCU", "Horned Frogs", "Big 12", &["Texas Christian"]),
    team("west-virginia", "West Virginia", "Mountaineers", "Big 12", &["WVU"]),
    team("ucf", "UCF", "Knights", "Big 12", &["Central Florida"]),
    team("utah", "Utah", "Utes", "Big 12", &[]),
    team("colorado", "Colorado", "Buffaloes", "Big 12", &[]),
    // SEC
    team("kentucky", "Kentucky", "Wildcats", "SEC", &["UK"]),
    team("tennessee", "Tennessee", "Volunteers", "SEC", &["Tenn"]),
    team("auburn", "Auburn", "Tigers", "SEC", &[]),
    team("alabama", "Alabama", "Crimson Tide", "SEC", &["Bama"]),
    team("florida", "Florida", "Gators", "SEC", &[]),
    team("texas", "Texas", "Longhorns", "SEC", &[]),
    team("texas-am", "Texas A&M", "Aggies", "SEC", &["TAMU"]),
    team("ole-miss", "Ole Miss", "Rebels", "SEC", &["Mississippi"]),
    team("mississippi-state", "Mississippi State", "Bulldogs", "SEC", &[]),
    team("south-carolina", "South Carolina", "Gamecocks", "SEC", &[]),
    team("georgia", "Georgia", "Bulldogs", "SEC", &["UGA"]),
    team("lsu", "LSU", "Tigers", "SEC", &["Louisiana State"]),
    team("missouri", "Missouri", "Tigers", "SEC", &["Mizzou"]),
    team("arkansas", "Arkansas", "Razorbacks", "SEC", &[]),
    team("vanderbilt", "Vanderbilt", "Commodores", "SEC", &["Vandy"]),
    team("oklahoma", "Oklahoma", "Sooners", "SEC", &[]),
    // Big Ten
    team("purdue", "Purdue", "Boilermakers", "Big Ten", &[]),
    team("michigan", "Michigan", "Wolverines", "Big Ten", &[]),
    team("michigan-state", "Michigan State", "Spartans", "Big Ten", &["MSU"]),
    team("illinois", "Illinois", "Fighting Illini", "Big Ten", &[]),
    team("indiana", "Indiana", "Hoosiers", "Big Ten", &[]),
    team("wisconsin", "Wisconsin", "Badgers", "Big Ten", &[]),
    team("ohio-state", "Ohio State", "Buckeyes", "Big Ten", &["OSU"]),
    team("penn-state", "Penn State", "Nittany Lions", "Big Ten", &[]),
    team("ucla", "UCLA", "Bruins", "Big Ten", &[]),
    team("usc", "USC", "Trojans", "Big Ten", &["Southern California"]),
    team("oregon", "Oregon", "Ducks", "Big Ten", &[]),
    team("washington", "Washington", "Huskies", "Big Ten", &["UW"]),
    // West Coast
    team("gonzaga", "Gonzaga", "Bulldogs", "WCC", &["Zags"]),
    team("saint-marys", "Saint Mary's", "Gaels", "WCC", &["St. Mary's", "Saint Mary's CA"]),
    team("loyola-marymount", "Loyola Marymount", "Lions", "WCC", &["LMU", "Loyola"]),
    team("washington-state", "Washington State", "Cougars", "WCC", &["Wazzu"]),
    team("oregon-state", "Oregon State", "Beavers", "WCC", &[]),
    // Atlantic 10 / American / others
    team("dayton", "Dayton", "Flyers", "A-10", &[]),
    team("saint-louis", "Saint Louis", "Billikens", "A-10", &["SLU", "St. Louis"]),
    team("loyola-chicago", "Loyola Chicago", "Ramblers", "A-10", &["Loyola (IL)", "Loyola"]),
    team("memphis", "Memphis", "Tigers", "AAC", &[]),
    team("loyola-maryland", "Loyola Maryland", "Greyhounds", "Patriot", &["Loyola (MD)", "Loyola"]),
    // MAC
    team("miami-oh", "Miami (OH)", "RedHawks", "MAC", &["Miami OH", "Miami Ohio", "Miami"]),
    team("ohio", "Ohio", "Bobcats", "MAC", &["Ohio U"]),
    team("kent-state", "Kent State", "Golden Flashes", "MAC", &[]),
    team("akron", "Akron", "Zips", "MAC", &[]),
    // Recent Division I arrivals
    SeedTeam {
        id: "st-thomas",
        name: "St. Thomas",
        mascot: "Tommies",
        conference: "Summit",
        first_season: 2022,
        aliases: &["St. Thomas (MN)", "Saint Thomas"],
    },
    SeedTeam {
        id: "le-moyne",
        name: "Le Moyne",
        mascot: "Dolphins",
        conference: "NEC",
        first_season: 2024,
        aliases: &[],
    },
];

/// Conference names as they commonly appear in source payloads.
pub fn canonical_conference(raw: &str) -> String {
    let key = raw
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>();
    let canonical = match key.as_str() {
        "acc" | "atlanticcoast" | "atlanticcoastconference" => "acc",
        "bigeast" => "big east",
        "big12" | "bigtwelve" => "big 12",
        "big10" | "bigten" => "big ten",
        "sec" | "southeastern" | "southeasternconference" => "sec",
        "wcc" | "westcoast" | "westcoastconference" => "wcc",
        "a10" | "atlantic10" | "atlantic10conference" => "a-10",
        "aac" | "american" | "americanathletic" => "aac",
        "mac" | "midamerican" | "midamericanconference" => "mac",
        "patriot" | "patriotleague" => "patriot",
        "summit" | "summitleague" => "summit",
        "nec" | "northeast" | "northeastconference" => "nec",
        _ => return raw.trim().to_lowercase(),
    };
    canonical.to_string()
}

/// Look-up view over the seed table.
pub struct TeamRegistry {
    teams: HashMap<TeamId, &'static SeedTeam>,
    mascots: Vec<String>,
}

impl TeamRegistry {
    pub fn seeded() -> Self {
        Self::from_seed(SEED_TEAMS)
    }

    pub fn from_seed(seed: &'static [SeedTeam]) -> Self {
        let teams = seed.iter().map(|t| (t.id.to_string(), t)).collect();
        let mut mascots: Vec<String> = seed.iter().map(|t| t.mascot.to_lowercase()).collect();
        // Longest first so "golden eagles" is stripped before "eagles".
        mascots.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        mascots.dedup();
        TeamRegistry { teams, mascots }
    }

    pub fn get(&self, id: &str) -> Option<&'static SeedTeam> {
        self.teams.get(id).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &'static SeedTeam> + '_ {
        self.teams.values().copied()
    }

    pub fn len(&self) -> usize {
        self.teams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.teams.is_empty()
    }

    /// Known mascot names, lowercase, longest first.
    pub fn mascots(&self) -> &[String] {
        &self.mascots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn seed_ids_are_unique() {
        let mut seen = HashSet::new();
        for t in SEED_TEAMS {
            assert!(seen.insert(t.id), "duplicate team id {}", t.id);
        }
        assert_eq!(TeamRegistry::seeded().len(), SEED_TEAMS.len());
    }

    #[test]
    fn conference_spellings_collapse() {
        assert_eq!(canonical_conference("ACC"), "acc");
        assert_eq!(canonical_conference("Atlantic Coast"), "acc");
        assert_eq!(canonical_conference("Mid-American"), "mac");
        assert_eq!(canonical_conference("Big Ten"), canonical_conference("big10"));
    }

    #[test]
    fn mascots_sorted_longest_first() {
        let reg = TeamRegistry::seeded();
        let golden = reg.mascots().iter().position(|m| m == "golden eagles");
        let eagles = reg.mascots().iter().position(|m| m == "eagles");
        assert!(golden.unwrap() < eagles.unwrap());
    }
}
