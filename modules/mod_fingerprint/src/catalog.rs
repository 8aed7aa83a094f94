/// Handshake signatures known for one browser family.
///
/// `versions` maps a minimum major version to a profile token. Every family carries
/// exactly one default, used when no listed version is at or below the requested one.
#[derive(Debug)]
pub struct FamilyProfile {
    pub name: &'static str,
    pub default_token: &'static str,
    pub versions: &'static [(u32, &'static str)],
}

impl FamilyProfile {
    /// Floor selection: the token of the greatest listed version not above `major`.
    pub fn select(&self, major: u32) -> &'static str {
        self.versions
            .iter()
            .filter(|(min, _)| *min <= major)
            .max_by_key(|(min, _)| *min)
            .map(|(_, token)| *token)
            .unwrap_or(self.default_token)
    }
}

// Tokens follow the ClientHello profiles in `haze_net::profile`.
static BUILTIN: &[FamilyProfile] = &[
    FamilyProfile {
        name: "Firefox",
        default_token: "120",
        versions: &[
            (55, "55"),
            (56, "56"),
            (63, "63"),
            (65, "65"),
            (99, "99"),
            (102, "102"),
            (105, "105"),
            (120, "120"),
        ],
    },
    FamilyProfile {
        name: "Chrome",
        default_token: "133",
        versions: &[
            (58, "58"),
            (62, "62"),
            (70, "70"),
            (72, "72"),
            (83, "83"),
            (87, "87"),
            (96, "96"),
            (100, "100"),
            (102, "102"),
            (106, "106"),
            (112, "112_PSK"),
            (114, "114_PSK"),
            (115, "115_PQ"),
            (120, "120"),
            (131, "131"),
            (133, "133"),
        ],
    },
    FamilyProfile {
        name: "iOS",
        default_token: "14",
        // "111" is iOS 11.1
        versions: &[(11, "111"), (12, "12.1"), (13, "13"), (14, "14")],
    },
    FamilyProfile {
        name: "Android",
        default_token: "11",
        versions: &[],
    },
    FamilyProfile {
        name: "Edge",
        default_token: "85",
        versions: &[(85, "85")],
    },
    FamilyProfile {
        name: "Safari",
        default_token: "16.0",
        versions: &[],
    },
    FamilyProfile {
        name: "360Browser",
        default_token: "7.5",
        versions: &[],
    },
    FamilyProfile {
        name: "QQBrowser",
        default_token: "11.1",
        versions: &[],
    },
];

/// Read-only table of browser families and their handshake signatures.
#[derive(Debug, Clone, Copy)]
pub struct FingerprintCatalog {
    families: &'static [FamilyProfile],
}

impl FingerprintCatalog {
    pub const fn new(families: &'static [FamilyProfile]) -> Self {
        Self { families }
    }

    pub const fn builtin() -> Self {
        Self::new(BUILTIN)
    }

    pub fn family(&self, name: &str) -> Option<&'static FamilyProfile> {
        self.families.iter().find(|f| f.name == name)
    }

    pub fn browsers(&self) -> Vec<&'static str> {
        self.families.iter().map(|f| f.name).collect()
    }

    /// Listed versions of `name`, ascending. The default entry is not included.
    pub fn versions(&self, name: &str) -> Vec<u32> {
        let mut versions: Vec<u32> = self
            .family(name)
            .map(|f| f.versions.iter().map(|(v, _)| *v).collect())
            .unwrap_or_default();
        versions.sort_unstable();
        versions
    }
}

impl Default for FingerprintCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}
