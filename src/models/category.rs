//! Static cookie disclosure catalogue shown on the preferences panel.

use serde::Serialize;

use super::ConsentCategory;

/// Storage slot holding the visitor's consent record.
pub const CONSENT_STORAGE_KEY: &str = "js_property_cookie_consent";

/// Cookie carrying the visitor id.
pub const SESSION_COOKIE: &str = "session_id";

/// A cookie declared for disclosure.
#[derive(Debug, Clone, Serialize)]
pub struct CookieEntry {
    pub name: &'static str,
    pub provider: &'static str,
    pub purpose: &'static str,
    pub duration: &'static str,
}

/// Describes one consent category for the disclosure UI.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CookieCategoryDescriptor {
    pub id: ConsentCategory,
    pub name: &'static str,
    pub description: &'static str,
    pub required: bool,
    pub cookies: &'static [CookieEntry],
    /// Cookie-name prefixes deleted when the category is revoked.
    pub purge_prefixes: &'static [&'static str],
    /// Exact cookie names deleted when the category is revoked.
    pub purge_names: &'static [&'static str],
}

impl CookieCategoryDescriptor {
    /// Whether revoking this category deletes the cookie `name`.
    pub fn purges(&self, name: &str) -> bool {
        self.purge_names.contains(&name) || self.purge_prefixes.iter().any(|p| name.starts_with(p))
    }
}

pub const COOKIE_CATEGORIES: &[CookieCategoryDescriptor] = &[
    CookieCategoryDescriptor {
        id: ConsentCategory::Essential,
        name: "Cookies essentiels",
        description: "Ces cookies sont nécessaires au fonctionnement du site. Ils permettent \
            d'utiliser les fonctionnalités de base comme la navigation et l'accès aux zones \
            sécurisées. Le site ne peut pas fonctionner correctement sans ces cookies.",
        required: true,
        cookies: &[
            CookieEntry {
                name: CONSENT_STORAGE_KEY,
                provider: "JS Property",
                purpose: "Stocke vos préférences de consentement aux cookies",
                duration: "1 an",
            },
            CookieEntry {
                name: SESSION_COOKIE,
                provider: "JS Property",
                purpose: "Identifiant visiteur associé à votre choix de consentement",
                duration: "1 an",
            },
        ],
        purge_prefixes: &[],
        purge_names: &[],
    },
    CookieCategoryDescriptor {
        id: ConsentCategory::Analytics,
        name: "Cookies analytiques",
        description: "Ces cookies nous permettent de mesurer l'audience de notre site, de \
            comprendre comment les visiteurs naviguent et d'améliorer nos services. Toutes les \
            données sont anonymisées.",
        required: false,
        cookies: &[
            CookieEntry {
                name: "_ga",
                provider: "Google Analytics",
                purpose: "Distingue les utilisateurs uniques",
                duration: "2 ans",
            },
            CookieEntry {
                name: "_ga_*",
                provider: "Google Analytics",
                purpose: "Maintient l'état de la session",
                duration: "2 ans",
            },
            CookieEntry {
                name: "_gid",
                provider: "Google Analytics",
                purpose: "Distingue les utilisateurs",
                duration: "24 heures",
            },
        ],
        purge_prefixes: &["_ga", "_gid"],
        purge_names: &[],
    },
    CookieCategoryDescriptor {
        id: ConsentCategory::Marketing,
        name: "Cookies marketing",
        description: "Ces cookies sont utilisés pour vous montrer des publicités pertinentes. \
            Ils permettent de mesurer l'efficacité de nos campagnes et de limiter le nombre de \
            fois où vous voyez une publicité.",
        required: false,
        cookies: &[
            CookieEntry {
                name: "_fbp",
                provider: "Facebook",
                purpose: "Suivi des conversions publicitaires",
                duration: "3 mois",
            },
            CookieEntry {
                name: "fr",
                provider: "Facebook",
                purpose: "Ciblage publicitaire",
                duration: "3 mois",
            },
        ],
        purge_prefixes: &["_fb"],
        purge_names: &["fr"],
    },
    CookieCategoryDescriptor {
        id: ConsentCategory::Preferences,
        name: "Cookies de préférences",
        description: "Ces cookies permettent au site de se souvenir de vos choix (comme votre \
            langue préférée) et d'offrir des fonctionnalités améliorées et personnalisées.",
        required: false,
        cookies: &[
            CookieEntry {
                name: "locale",
                provider: "JS Property",
                purpose: "Mémorise votre langue préférée",
                duration: "1 an",
            },
            CookieEntry {
                name: "theme",
                provider: "JS Property",
                purpose: "Mémorise vos préférences d'affichage",
                duration: "1 an",
            },
        ],
        purge_prefixes: &[],
        purge_names: &["locale", "theme"],
    },
];

/// Look up the descriptor for a category.
pub fn descriptor(category: ConsentCategory) -> &'static CookieCategoryDescriptor {
    COOKIE_CATEGORIES
        .iter()
        .find(|d| d.id == category)
        .unwrap_or(&COOKIE_CATEGORIES[0])
}
