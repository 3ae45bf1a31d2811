//! Document-type taxonomy and portal code resolution.
//!
//! Two classification layers coexist:
//!
//! 1. [`DocumentType`] - the closed taxonomy stored in the index
//!    (`document_type` column), with `UNKNOWN` as the catch-all.
//! 2. The portal's `doc_type` query codes - the county search endpoint keys
//!    document classes by two-character codes (`DEED` = `01`,
//!    `ROYALTY DEED` = `A7`). [`resolve_document_code`] maps the free-text
//!    instrument types found in index rows onto that table, tolerating the
//!    truncation the spreadsheets apply at 20 and 30 characters.

use strsim::normalized_levenshtein;

/// Portal query code used when a row's type cannot be resolved.
pub const DEFAULT_PORTAL_DOC_CODE: &str = "01";

/// Minimum similarity for a fuzzy instrument-type match.
const MIN_SIMILARITY: f64 = 0.85;

/// Minimum coverage for a prefix match (truncated type / full type length).
const MIN_PREFIX_COVERAGE: f64 = 0.7;

/// The portal's complete document-class code table.
///
/// Keys are the instrument-type names as the county records them; values are
/// the two-character `doc_type` codes the search endpoint expects.
pub static PORTAL_DOC_CODES: &[(&str, &str)] = &[
    ("DEED", "01"),
    ("DEED OF TRUST", "02"),
    ("ASSIGNMENT OF DEED OF TRUST", "03"),
    ("POWER OF ATTORNEY", "04"),
    ("PARTIAL RELEASE", "05"),
    ("LEASE ASSIGNMENT", "06"),
    ("EASEMENT", "07"),
    ("TAX RELEASE", "08"),
    ("TRUSTEES DEED", "09"),
    ("SUBSTITUTE TRUSTEE", "11"),
    ("RIGHT OF WAY", "12"),
    ("POWER OF ATTORNEY-GENERAL", "13"),
    ("PROTECTIVE COVENANT", "14"),
    ("AMENDED PROTECTIVE COVENANT", "15"),
    ("AGREEMENT", "16"),
    ("MINERAL DEED", "17"),
    ("RATIFICATION", "18"),
    ("RENTAL ASSIGNMENT", "19"),
    ("MINERAL RIGHT & ROYALTY TRANSF", "20"),
    ("OIL GAS MINERAL LEASE", "21"),
    ("TRUST AGREEMENT", "22"),
    ("RELEASE - RIGHT OF WAY", "23"),
    ("FINANCING STATEMENT", "24"),
    ("DISCLAIMER", "25"),
    ("OPTION", "26"),
    ("PATENT", "27"),
    ("DECLARATION", "28"),
    ("AMENDED DECLARATION", "29"),
    ("CONTRACT TO SELL", "30"),
    ("AFFIDAVIT", "31"),
    ("JUDGMENT OR ORDER", "32"),
    ("SUBORDINATION", "33"),
    ("INDENTURE", "34"),
    ("TAX SALE", "35"),
    ("ASSUMPTION AGREEMENT", "36"),
    ("LEASE CONTRACT", "37"),
    ("ASSIGN OIL GAS & MINERAL LEASE", "38"),
    ("UCC FINANCING STATEMENT", "40"),
    ("UCC CONTINUATION", "41"),
    ("UCC AMENDMENT", "42"),
    ("UCC ASSIGNMENT", "43"),
    ("UCC PARTIAL RELEASE", "44"),
    ("UCC TERMINATION", "45"),
    ("AMENDMENT", "46"),
    ("ASSIGNMENT", "47"),
    ("RECEIVER", "48"),
    ("RENTAL DIVISION ORDER", "49"),
    ("REVOCATION & CANCELL OF PA", "50"),
    ("CONSTRUCTION LIEN", "51"),
    ("LIS PENDENS", "52"),
    ("AGREEMENT-DEEDS", "53"),
    ("ASSIGNMENT - DEEDS", "54"),
    ("RELEASE OF OIL GAS & MINERAL L", "55"),
    ("AMENDMENT OF OIL & GAS LEASE", "56"),
    ("PLAT FILED", "57"),
    ("DECLARATION OF ROAD CLOSURE", "58"),
    ("AMENDMENT TO LEASE", "59"),
    ("CERT DISCHARGE FEDERAL TAX LIE", "60"),
    ("MORTGAGEE'S WAIVER AND CONSENT", "61"),
    ("CONDOMINIUM LIEN", "62"),
    ("ASSESSMENT LIEN", "63"),
    ("CANCEL OF ASSESSMENT", "64"),
    ("CHANGE OF DEPOSITORY", "65"),
    ("NOTICE OF FORFEITURE", "66"),
    ("VENDOR'S LIEN", "67"),
    ("LAST WILL AND TESTAMENT", "68"),
    ("CERTIFICATION LANDMARK DESIG", "69"),
    ("MODIFICATION AGREEMENT", "70"),
    ("CERT OF SALE/SEIZED PROPERTY", "71"),
    ("RELEASE OF RIGHT OF REFUSAL", "72"),
    ("UCC SUBORDINATION", "73"),
    ("MAP", "74"),
    ("CERTIFICATION OF MOBILE HOME", "75"),
    ("ENVIRONMENTAL PROTECTION AGENC", "76"),
    ("RECISSION OF FORECLOSURE", "77"),
    ("CHARGE BACK", "78"),
    ("HOMESTEAD DISALLOWANCE", "79"),
    ("PARTIAL RELEASE OF ASSESSMENT", "80"),
    ("NOTICE OF LIEN", "81"),
    ("FEDERAL TAX LIEN", "82"),
    ("PARTIAL RELEASE TIMBER DEED", "83"),
    ("VOID LEASES 16TH SECTION", "85"),
    ("WAIVER", "86"),
    ("EMINENT DOMAIN", "87"),
    ("ASSIGNMENT OF LEASES RENTS & P", "88"),
    ("LIEN", "89"),
    ("RIGHT OF FIRST REFUSAL", "90"),
    ("SURVEYS", "91"),
    ("MISCELLANEOUS \"W\"", "92"),
    ("PROTECTIVE COV TERMINATION", "93"),
    ("LIVING WILL", "94"),
    ("RELEASE", "95"),
    ("HEIRSHIP", "96"),
    ("RELEASE OF CONSTRUCTION LIEN", "97"),
    ("SUPPLEMENT TO COVENANTS", "98"),
    ("RELEASE OF LIS PENDINGS", "99"),
    ("TERM OF FINANCING STATEMENT", "A1"),
    ("ARCHITECTURAL REVIEW", "A2"),
    ("MISCELLANEOUS \"T\"", "A3"),
    ("AFFIDAVIT \"T\"", "A4"),
    ("DEED RESTRICTIONS", "A5"),
    ("NOTICE TO RENEW LEASE CONTRACT", "A6"),
    ("ROYALTY DEED", "A7"),
];

/// Known truncations the index spreadsheets apply to instrument types.
static TRUNCATION_MAPPINGS: &[(&str, &str)] = &[
    ("ASSIGNMENT OF DEED O", "ASSIGNMENT OF DEED OF TRUST"),
    ("AMENDED PROTECTIVE C", "AMENDED PROTECTIVE COVENANT"),
    ("MINERAL RIGHT  ROYA", "MINERAL RIGHT & ROYALTY TRANSF"),
    ("POWER OF ATTORNEY-GE", "POWER OF ATTORNEY-GENERAL"),
    ("REVOCATION  CANCELL", "REVOCATION & CANCELL OF PA"),
    ("RELEASE - RIGHT OF W", "RELEASE - RIGHT OF WAY"),
    ("CERT DISCHARGE FEDERAL TAX LIE", "CERT DISCHARGE FEDERAL TAX LIEN"),
];

/// Closed document-type taxonomy stored in the index.
///
/// Grouped by broad legal function; the portal's hundred-plus instrument
/// classes fold into these when the loaders classify rows. `Unknown` is the
/// catch-all and is always a legal value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentType {
    // Conveyance
    Deed,
    Patent,
    Lease,
    // Security
    DeedOfTrust,
    Mortgage,
    AssignmentOfLeasesAndRents,
    // Servitudes
    Ccrs,
    ProtectiveCovenants,
    Easement,
    RightOfWay,
    // Involuntary liens
    ConstructionLien,
    FederalTaxLien,
    Judgment,
    LisPendens,
    Ucc,
    HoaAssessmentLien,
    // Change
    Release,
    PartialRelease,
    ModificationAgreement,
    Assignment,
    SubordinationAgreement,
    SubstitutionOfTrustee,
    // Other
    Will,
    CourtDecree,
    Affidavit,
    Agreement,
    PowerOfAttorney,
    TrustAgreement,
    Plats,
    Plans,
    Unknown,
}

impl DocumentType {
    /// Returns the taxonomy code stored in the `document_type` column.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deed => "DEED",
            Self::Patent => "PATENT",
            Self::Lease => "LEASE",
            Self::DeedOfTrust => "DEED_OF_TRUST",
            Self::Mortgage => "MORTGAGE",
            Self::AssignmentOfLeasesAndRents => "ASSIGNMENT_OF_LEASES_AND_RENTS",
            Self::Ccrs => "CCRS",
            Self::ProtectiveCovenants => "PROTECTIVE_COVENANTS",
            Self::Easement => "EASEMENT",
            Self::RightOfWay => "RIGHT_OF_WAY",
            Self::ConstructionLien => "CONSTRUCTION_LIEN",
            Self::FederalTaxLien => "FEDERAL_TAX_LIEN",
            Self::Judgment => "JUDGMENT",
            Self::LisPendens => "LIS_PENDENS",
            Self::Ucc => "UCC",
            Self::HoaAssessmentLien => "HOA_ASSESSMENT_LIEN",
            Self::Release => "RELEASE",
            Self::PartialRelease => "PARTIAL_RELEASE",
            Self::ModificationAgreement => "MODIFICATION_AGREEMENT",
            Self::Assignment => "ASSIGNMENT",
            Self::SubordinationAgreement => "SUBORDINATION_AGREEMENT",
            Self::SubstitutionOfTrustee => "SUBSTITUTION_OF_TRUSTEE",
            Self::Will => "WILL",
            Self::CourtDecree => "COURT_DECREE",
            Self::Affidavit => "AFFIDAVIT",
            Self::Agreement => "AGREEMENT",
            Self::PowerOfAttorney => "POWER_OF_ATTORNEY",
            Self::TrustAgreement => "TRUST_AGREEMENT",
            Self::Plats => "PLATS",
            Self::Plans => "PLANS",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Parses a taxonomy code leniently; anything unrecognized is `Unknown`.
    #[must_use]
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_uppercase().as_str() {
            "DEED" => Self::Deed,
            "PATENT" => Self::Patent,
            "LEASE" => Self::Lease,
            "DEED_OF_TRUST" => Self::DeedOfTrust,
            "MORTGAGE" => Self::Mortgage,
            "ASSIGNMENT_OF_LEASES_AND_RENTS" => Self::AssignmentOfLeasesAndRents,
            "CCRS" => Self::Ccrs,
            "PROTECTIVE_COVENANTS" => Self::ProtectiveCovenants,
            "EASEMENT" => Self::Easement,
            "RIGHT_OF_WAY" => Self::RightOfWay,
            "CONSTRUCTION_LIEN" => Self::ConstructionLien,
            "FEDERAL_TAX_LIEN" => Self::FederalTaxLien,
            "JUDGMENT" => Self::Judgment,
            "LIS_PENDENS" => Self::LisPendens,
            "UCC" => Self::Ucc,
            "HOA_ASSESSMENT_LIEN" => Self::HoaAssessmentLien,
            "RELEASE" => Self::Release,
            "PARTIAL_RELEASE" => Self::PartialRelease,
            "MODIFICATION_AGREEMENT" => Self::ModificationAgreement,
            "ASSIGNMENT" => Self::Assignment,
            "SUBORDINATION_AGREEMENT" => Self::SubordinationAgreement,
            "SUBSTITUTION_OF_TRUSTEE" => Self::SubstitutionOfTrustee,
            "WILL" => Self::Will,
            "COURT_DECREE" => Self::CourtDecree,
            "AFFIDAVIT" => Self::Affidavit,
            "AGREEMENT" => Self::Agreement,
            "POWER_OF_ATTORNEY" => Self::PowerOfAttorney,
            "TRUST_AGREEMENT" => Self::TrustAgreement,
            "PLATS" => Self::Plats,
            "PLANS" => Self::Plans,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for DocumentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Converts a taxonomy code column value to the lower-kebab archive token.
///
/// `None` and empty values map to `"unknown"`, matching the archive path
/// contract for unclassified rows.
#[must_use]
pub fn doc_type_slug(document_type: Option<&str>) -> String {
    let code = document_type.map(str::trim).filter(|s| !s.is_empty());
    code.unwrap_or("UNKNOWN").to_lowercase().replace('_', "-")
}

/// Parses an `InstrumentType` index field into the uppercased type name.
///
/// The index writes these as `"TYPE - extra detail"`; everything from the
/// first `" - "` separator on is discarded.
///
/// # Examples
///
/// ```
/// use deedpull_core::index::parse_instrument_type;
///
/// assert_eq!(
///     parse_instrument_type("Deed of Trust - refinance"),
///     Some("DEED OF TRUST".to_string())
/// );
/// assert_eq!(parse_instrument_type("  "), None);
/// ```
#[must_use]
pub fn parse_instrument_type(raw: &str) -> Option<String> {
    let upper = raw.trim().to_uppercase();
    if upper.is_empty() {
        return None;
    }

    let head = match upper.find(" - ") {
        Some(pos) => upper[..pos].trim().to_string(),
        None => upper,
    };

    if head.is_empty() { None } else { Some(head) }
}

/// Looks up the exact portal code for an instrument-type name.
#[must_use]
pub fn portal_doc_code(type_name: &str) -> Option<&'static str> {
    let upper = type_name.trim().to_uppercase();
    PORTAL_DOC_CODES
        .iter()
        .find(|(name, _)| *name == upper)
        .map(|(_, code)| *code)
}

/// Resolves a (possibly truncated) instrument-type name to a portal code.
///
/// Resolution order:
/// 1. Exact match against the code table.
/// 2. Known truncation mappings from spreadsheet column limits.
/// 3. Prefix match where the input covers at least 70% of the full name.
/// 4. Normalized-Levenshtein similarity at or above 0.85.
///
/// Anything unresolved falls back to the DEED code, which is what the portal
/// search needs to locate the vast majority of records; the row's own
/// `document_type` classification is unaffected.
#[must_use]
pub fn resolve_document_code(type_name: Option<&str>) -> &'static str {
    let Some(raw) = type_name.map(str::trim).filter(|s| !s.is_empty()) else {
        return DEFAULT_PORTAL_DOC_CODE;
    };
    let upper = raw.to_uppercase();

    if let Some(code) = portal_doc_code(&upper) {
        return code;
    }

    if let Some((_, full)) = TRUNCATION_MAPPINGS.iter().find(|(short, _)| *short == upper) {
        // A mapping target may extend past the table's own 30-char limit
        // (CERT DISCHARGE FEDERAL TAX LIEN); fall back through prefix logic.
        if let Some(code) = portal_doc_code(full) {
            return code;
        }
        if let Some(code) = best_prefix_code(full) {
            return code;
        }
    }

    if let Some(code) = best_prefix_code(&upper) {
        return code;
    }

    let mut best: Option<(&'static str, f64)> = None;
    for (name, code) in PORTAL_DOC_CODES {
        let score = normalized_levenshtein(&upper, name);
        if score >= MIN_SIMILARITY && best.map_or(true, |(_, s)| score > s) {
            best = Some((code, score));
        }
    }

    best.map_or(DEFAULT_PORTAL_DOC_CODE, |(code, _)| code)
}

/// Finds the table entry the input is a prefix of, requiring 70% coverage.
fn best_prefix_code(upper: &str) -> Option<&'static str> {
    let mut best: Option<(&'static str, f64)> = None;
    for (name, code) in PORTAL_DOC_CODES {
        if name.starts_with(upper) {
            #[allow(clippy::cast_precision_loss)]
            let coverage = upper.len() as f64 / name.len() as f64;
            if coverage >= MIN_PREFIX_COVERAGE && best.map_or(true, |(_, c)| coverage > c) {
                best = Some((code, coverage));
            }
        }
    }
    best.map(|(code, _)| code)
}

/// Returns true when a type name indicates a will or testament.
///
/// Drives the priority-1 assignment in the cleaning pass.
#[must_use]
pub fn is_will_type(type_name: &str) -> bool {
    let upper = type_name.to_uppercase();
    upper.contains("WILL") || upper.contains("TESTAMENT")
}
