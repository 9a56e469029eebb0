//! Rule registry.
//!
//! The registry is the static catalog of every detection rule: its
//! pattern, its optional validator, its base confidence and the context
//! keywords that raise confidence when they appear near a match. It is
//! built once and shared by every job; enabling rules is done with a
//! [`RuleSet`](super::RuleSet), never by mutating the registry.

use once_cell::sync::OnceCell;
use regex::Regex;

use super::normalize::normalize_for_validation;
use super::validators;
use super::{PatternMatcher, RuleId};
use crate::error::{RedactorError, RedactorResult};

/// Checks the exact substring matched by a rule pattern.
pub type Validator = fn(&str) -> bool;

struct RuleSpec {
    id: RuleId,
    pattern: &'static str,
    validator: Option<Validator>,
    confidence: f32,
    keywords: &'static [&'static str],
}

const MONTHS: &str = "enero|febrero|marzo|abril|mayo|junio|julio|agosto|septiembre|octubre|noviembre|diciembre|january|february|march|april|may|june|july|august|september|october|november|december";

// Declared in priority order; `RuleRegistry::try_build` checks it.
const RULE_SPECS: &[RuleSpec] = &[
    RuleSpec {
        id: RuleId::Iban,
        pattern: r"\b[A-Z]{2}\d{2}(?:[ \-]?[A-Z0-9]){11,30}\b",
        validator: Some(validators::is_valid_iban),
        confidence: 0.95,
        keywords: &["iban", "cuenta", "account", "bank", "banco", "transferencia"],
    },
    RuleSpec {
        id: RuleId::CreditCard,
        pattern: r"\b(?:\d[ \-]*?){13,19}\b",
        validator: Some(validators::is_valid_card),
        confidence: 0.95,
        keywords: &["card", "tarjeta", "visa", "mastercard", "amex", "credit", "crédito"],
    },
    RuleSpec {
        id: RuleId::Dni,
        pattern: r"\b\d{8}[ \-]?[A-Za-z]\b",
        validator: Some(validators::is_valid_dni),
        confidence: 0.9,
        keywords: &["dni", "documento", "identidad", "nif"],
    },
    RuleSpec {
        id: RuleId::Nie,
        pattern: r"\b[XYZxyz][ \-]?\d{7}[ \-]?[A-Za-z]\b",
        validator: Some(validators::is_valid_nie),
        confidence: 0.9,
        keywords: &["nie", "extranjero", "residencia", "nif"],
    },
    RuleSpec {
        id: RuleId::Cif,
        pattern: r"\b[ABCDEFGHJNPQRSUVW][ \-]?\d{7}[ \-]?[0-9A-J]\b",
        validator: Some(validators::is_valid_cif),
        confidence: 0.9,
        keywords: &["cif", "empresa", "sociedad", "company", "nif"],
    },
    RuleSpec {
        id: RuleId::Ssn,
        pattern: r"\b\d{3}[ \-]\d{2}[ \-]\d{4}\b|\b\d{2}[ /\-]?\d{8}[ /\-]?\d{2}\b",
        validator: Some(validators::is_valid_ssn),
        confidence: 0.85,
        keywords: &["ssn", "social security", "seguridad social", "nss", "afiliación"],
    },
    RuleSpec {
        id: RuleId::Email,
        pattern: r"\b[a-zA-Z0-9._%+\-]+@[a-zA-Z0-9](?:[a-zA-Z0-9\-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9\-]{0,61}[a-zA-Z0-9])?)+",
        validator: Some(validators::is_valid_email),
        confidence: 0.9,
        keywords: &["email", "e-mail", "correo", "mail", "contact", "contacto"],
    },
    RuleSpec {
        id: RuleId::Phone,
        pattern: r"(?:\+\d{1,3}[\s.\-]?)?(?:\(\d{2,4}\)[\s.\-]?|\b\d{2,4}[\s.\-])\d{2,4}[\s.\-]\d{2,4}(?:[\s.\-]\d{2,4})?\b|\b[6-9]\d{8}\b",
        validator: Some(validators::is_valid_phone),
        confidence: 0.85,
        keywords: &["phone", "tel", "teléfono", "telefono", "móvil", "movil", "mobile", "call", "fax"],
    },
    RuleSpec {
        id: RuleId::IpAddress,
        pattern: r"\b(?:(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)\.){3}(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)\b|(?i:\b(?:[0-9a-f]{1,4}:){7}[0-9a-f]{1,4}\b)|(?i:\b(?:[0-9a-f]{1,4}:){1,6}:(?:[0-9a-f]{1,4}(?::[0-9a-f]{1,4}){0,5})?\b)",
        validator: Some(validators::is_valid_ip),
        confidence: 0.9,
        keywords: &["ip", "address", "dirección ip", "host", "server", "servidor"],
    },
    RuleSpec {
        id: RuleId::DateOfBirth,
        pattern: "",
        validator: Some(validators::is_valid_date),
        confidence: 0.55,
        keywords: &["nacimiento", "birth", "born", "nacido", "nacida", "fecha de nacimiento", "dob", "f. nac"],
    },
    RuleSpec {
        id: RuleId::Address,
        pattern: r"(?i:\b(?:calle|c/|avenida|av\.|avda\.|plaza|pza\.|paseo|camino|carretera)[ \t]+[a-záéíóúñü ]+,?[ \t]*(?:n[úuº]?\.?[ \t]*|número[ \t]*)?\d{1,4}(?:[ \t]*[a-z]\b)?(?:[ \t]*[,\-][ \t]*\d{5}(?:[ \t]+[a-záéíóúñü]+)?)?)|\b\d{1,5}[ \t]+[A-Z][a-z]+(?:[ \t]+[A-Z][a-z]+)*[ \t]+(?:Street|St|Avenue|Ave|Road|Rd|Boulevard|Blvd|Lane|Ln|Drive|Dr)\b(?:[ \t]*,[ \t]*(?:Apt|Apartment|Suite|Ste|Unit)\.?[ \t]*[A-Z0-9\-]+)?",
        validator: None,
        confidence: 0.7,
        keywords: &["dirección", "direccion", "domicilio", "address", "residencia", "vive en", "lives at"],
    },
    RuleSpec {
        id: RuleId::Username,
        pattern: r"\B@[a-zA-Z0-9_]{3,30}\b|(?i:\b(?:usuario|user|username|login|alias|nick|nickname)[ \t]*[:=][ \t]*)[a-zA-Z0-9_.\-]{3,30}",
        validator: None,
        confidence: 0.7,
        keywords: &["usuario", "user", "username", "login", "cuenta", "perfil", "profile"],
    },
    RuleSpec {
        id: RuleId::FullName,
        pattern: r"(?:\b(?:Sr\.|Sra\.|Dr\.|Dra\.|Don|Doña|Mr\.|Mrs\.|Ms\.)[ \t]+)?\b[A-ZÁÉÍÓÚÑ][a-záéíóúñ]{2,}(?:[ \-][A-ZÁÉÍÓÚÑ][a-záéíóúñ]{2,}){1,4}\b",
        validator: None,
        confidence: 0.5,
        keywords: &["nombre", "name", "titular", "firmado", "signed", "sr.", "sra.", "don", "doña", "mr.", "mrs."],
    },
    RuleSpec {
        id: RuleId::AccountHolder,
        pattern: r"(?i:\b(?:titular(?:es)?|account[ \t]+holder|beneficiario|propietario)[ \t]*:?[ \t]+)[A-ZÁÉÍÓÚÑ][A-Za-záéíóúñÁÉÍÓÚÑ ]{4,49}",
        validator: None,
        confidence: 0.8,
        keywords: &["titular", "holder", "beneficiario", "propietario", "cuenta"],
    },
    RuleSpec {
        id: RuleId::Passport,
        pattern: r"(?i:\b(?:passport|pasaporte|ppt)(?:[ \t]*(?:no\.?|number|n[úu]m(?:ero)?\.?))?[ \t:#\-]+)[A-Z0-9]{6,12}\b",
        validator: None,
        confidence: 0.8,
        keywords: &["passport", "pasaporte", "viaje", "travel"],
    },
    RuleSpec {
        id: RuleId::LicensePlate,
        pattern: r"\b(?:\d{4}[ \-]?[BCDFGHJKLMNPRSTVWXYZ]{3}|[A-Z]{1,2}[ \-]?\d{4}[ \-]?[A-Z]{1,2}|[A-Z]{3}[ \-]?\d{3,4})\b",
        validator: None,
        confidence: 0.55,
        keywords: &["matrícula", "matricula", "placa", "plate", "vehículo", "vehiculo", "coche", "car"],
    },
    RuleSpec {
        id: RuleId::EmployeeId,
        pattern: r"(?i:\b(?:employee(?:[ \t]+id)?|empleado|emp|empl|staff|worker|legajo))[ \t:#\-]+[A-Z]{0,4}-?\d[\d\-]{2,11}\b",
        validator: None,
        confidence: 0.6,
        keywords: &["empleado", "employee", "staff", "trabajador", "worker", "legajo", "personal"],
    },
    RuleSpec {
        id: RuleId::Cookie,
        pattern: r"(?i:\b(?:cookie|session(?:[_ ]?id)?|jwt)[ \t]*[:=][ \t]*)[A-Za-z0-9+/=_.\-]{20,}|(?i:\bset-cookie:)[^\n]+",
        validator: None,
        confidence: 0.8,
        keywords: &["cookie", "session", "token", "jwt", "sesión"],
    },
    RuleSpec {
        id: RuleId::Credentials,
        pattern: r"(?i:\b(?:password|contraseña|clave|pwd|pass|api[_ ]?key|token|bearer|secret)[ \t:=]+)\S{6,}",
        validator: None,
        confidence: 0.85,
        keywords: &["password", "contraseña", "clave", "credential", "api", "token", "secret"],
    },
    RuleSpec {
        id: RuleId::HealthData,
        pattern: r"(?i:\b(?:diagnóstico|diagnostico|diagnosis|medicación|medicacion|medication|receta|enfermedad|tratamiento|treatment)[ \t:]+)[^\n]{10,100}",
        validator: None,
        confidence: 0.8,
        keywords: &["médico", "medico", "hospital", "paciente", "patient", "salud", "health", "clínica"],
    },
];

fn date_pattern() -> String {
    format!(
        r"\b\d{{1,2}}[/\-.]\d{{1,2}}[/\-.]\d{{2,4}}\b|\b\d{{4}}[/\-.]\d{{1,2}}[/\-.]\d{{1,2}}\b|(?i:\b\d{{1,2}}[ \t]+(?:de[ \t]+)?(?:{months})[ \t]+(?:de[ \t]+)?\d{{2,4}}\b)|(?i:\b(?:{months})[ \t]+\d{{1,2}},?[ \t]+\d{{2,4}}\b)",
        months = MONTHS
    )
}

/// A compiled detection rule.
#[derive(Debug)]
pub struct Rule {
    pub id: RuleId,
    pub pattern: Regex,
    pub validator: Option<Validator>,
    pub confidence: f32,
    pub keywords: &'static [&'static str],
}

impl Rule {
    /// Runs the validator on the exact matched substring.
    pub fn accepts(&self, matched: &str) -> bool {
        self.validator.map_or(true, |validate| validate(matched))
    }
}

impl PatternMatcher for Rule {
    fn rule_id(&self) -> RuleId {
        self.id
    }

    fn pattern(&self) -> &Regex {
        &self.pattern
    }

    fn extract_all<'a>(&self, text: &'a str) -> Vec<&'a str> {
        self.pattern
            .find_iter(text)
            .map(|m| m.as_str())
            .filter(|m| self.accepts(m))
            .collect()
    }

    fn normalize(&self, text: &str) -> Option<String> {
        let value = text.trim();
        if value.is_empty() || !self.accepts(value) {
            return None;
        }
        Some(normalize_for_validation(value, self.id))
    }
}

/// The compiled rule catalog, indexed by [`RuleId`].
#[derive(Debug)]
pub struct RuleRegistry {
    rules: Vec<Rule>,
}

static REGISTRY: OnceCell<RuleRegistry> = OnceCell::new();

impl RuleRegistry {
    /// Compiles every rule pattern.
    ///
    /// # Errors
    ///
    /// Returns `RedactorError::PatternError` naming the first rule whose
    /// pattern does not compile.
    pub fn try_build() -> RedactorResult<Self> {
        let date = date_pattern();
        let mut rules = Vec::with_capacity(RULE_SPECS.len());

        for (position, spec) in RULE_SPECS.iter().enumerate() {
            if spec.id.priority() != position {
                return Err(RedactorError::PatternError {
                    pattern: spec.id.token().to_string(),
                    reason: format!("declared at position {} out of priority order", position),
                });
            }

            let source = if spec.id == RuleId::DateOfBirth {
                date.as_str()
            } else {
                spec.pattern
            };
            let pattern = Regex::new(source).map_err(|e| RedactorError::PatternError {
                pattern: spec.id.token().to_string(),
                reason: e.to_string(),
            })?;

            rules.push(Rule {
                id: spec.id,
                pattern,
                validator: spec.validator,
                confidence: spec.confidence,
                keywords: spec.keywords,
            });
        }

        Ok(Self { rules })
    }

    /// Builds the shared registry on first use.
    pub fn init() -> RedactorResult<&'static RuleRegistry> {
        REGISTRY.get_or_try_init(Self::try_build)
    }

    /// The shared registry.
    ///
    /// # Panics
    ///
    /// Panics if a built-in pattern fails to compile. Binaries call
    /// [`RuleRegistry::init`] at startup so that this surfaces as an error.
    pub fn global() -> &'static RuleRegistry {
        Self::init().expect("built-in rule patterns compile")
    }

    pub fn get(&self, id: RuleId) -> &Rule {
        &self.rules[id.priority()]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
