use crate::http::Error;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

/// The kinds of resource the API serves. They all share one table; what tells them apart is
/// the `kind` column and the schema below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Bootcamp,
    Course,
    Review,
    User,
}

impl ResourceKind {
    /// Value of the `kind` column, also the prefix of this kind's unique index names.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bootcamp => "bootcamp",
            Self::Course => "course",
            Self::Review => "review",
            Self::User => "user",
        }
    }

    /// For messages, e.g. "Bootcamp not found with id of ...".
    pub fn label(self) -> &'static str {
        match self {
            Self::Bootcamp => "Bootcamp",
            Self::Course => "Course",
            Self::Review => "Review",
            Self::User => "User",
        }
    }

    /// Fields that are stored but never sent back to clients.
    pub fn hidden_fields(self) -> &'static [&'static str] {
        match self {
            Self::User => &["password"],
            _ => &[],
        }
    }

    pub fn schema(self) -> &'static [Field] {
        match self {
            Self::Bootcamp => BOOTCAMP,
            Self::Course => COURSE,
            Self::Review => REVIEW,
            Self::User => USER,
        }
    }

    /// Check `fields` against this kind's schema.
    ///
    /// Fields are checked in schema order and report at most one message each (the first rule
    /// they break), so the resulting `Error::Validation` lists messages in schema order.
    pub fn validate(self, fields: &Map<String, Value>, mode: Mode) -> Result<(), Error> {
        let messages: Vec<&str> = self
            .schema()
            .iter()
            .filter_map(|field| field.check(fields.get(field.name), mode))
            .collect();

        if messages.is_empty() {
            Ok(())
        } else {
            Err(Error::validation(messages))
        }
    }
}

/// Whether a document is being created or partially updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Create,
    /// Fields that are absent aren't being changed, so required-ness isn't checked for them.
    Update,
}

pub struct Field {
    pub name: &'static str,
    rules: &'static [Rule],
}

enum Rule {
    Required(&'static str),
    MaxLength(usize, &'static str),
    MinLength(usize, &'static str),
    Number(&'static str),
    Range(f64, f64, &'static str),
    OneOf(&'static [&'static str], &'static str),
    Matches(Pattern, &'static str),
}

#[derive(Clone, Copy)]
enum Pattern {
    Email,
    HttpUrl,
}

static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[A-Za-z]{2,}$").expect("valid regex"));

static HTTP_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^https?://(www\.)?[-A-Za-z0-9@:%._+~#=]{1,256}\.[A-Za-z0-9()]{1,6}\b([-A-Za-z0-9()@:%_+.~#?&/=]*)$")
        .expect("valid regex")
});

impl Pattern {
    fn is_match(self, s: &str) -> bool {
        match self {
            Self::Email => EMAIL.is_match(s),
            Self::HttpUrl => HTTP_URL.is_match(s),
        }
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Numbers may come in as JSON numbers or numeric strings.
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl Field {
    fn check(&self, value: Option<&Value>, mode: Mode) -> Option<&'static str> {
        let required = self.rules.iter().find_map(|rule| match rule {
            Rule::Required(message) => Some(*message),
            _ => None,
        });

        let value = match value {
            None if mode == Mode::Update => return None,
            None => return required,
            Some(value) if is_blank(value) => return required,
            Some(value) => value,
        };

        self.rules.iter().find_map(|rule| rule.check(value))
    }
}

impl Rule {
    /// `value` is known not to be blank here.
    fn check(&self, value: &Value) -> Option<&'static str> {
        let text = value.as_str();
        let failed = match self {
            Self::Required(_) => false,
            Self::MaxLength(max, _) => text.map_or(true, |s| s.chars().count() > *max),
            Self::MinLength(min, _) => text.map_or(true, |s| s.chars().count() < *min),
            Self::Number(_) => as_number(value).is_none(),
            Self::Range(min, max, _) => {
                as_number(value).map_or(true, |n| n < *min || n > *max)
            }
            Self::OneOf(allowed, _) => text.map_or(true, |s| !allowed.iter().any(|a| *a == s)),
            Self::Matches(pattern, _) => text.map_or(true, |s| !pattern.is_match(s)),
        };

        failed.then_some(self.message())
    }

    fn message(&self) -> &'static str {
        match self {
            Self::Required(m)
            | Self::MaxLength(_, m)
            | Self::MinLength(_, m)
            | Self::Number(m)
            | Self::Range(_, _, m)
            | Self::OneOf(_, m)
            | Self::Matches(_, m) => *m,
        }
    }
}

const BOOTCAMP: &[Field] = &[
    Field {
        name: "name",
        rules: &[
            Rule::Required("Please add a name"),
            Rule::MaxLength(50, "Name can not be more than 50 characters"),
        ],
    },
    Field {
        name: "description",
        rules: &[
            Rule::Required("Please add a description"),
            Rule::MaxLength(500, "Description can not be more than 500 characters"),
        ],
    },
    Field {
        name: "website",
        rules: &[Rule::Matches(
            Pattern::HttpUrl,
            "Please use a valid URL with HTTP or HTTPS",
        )],
    },
    Field {
        name: "phone",
        rules: &[Rule::MaxLength(
            20,
            "Phone number can not be longer than 20 characters",
        )],
    },
    Field {
        name: "email",
        rules: &[Rule::Matches(Pattern::Email, "Please add a valid email")],
    },
    Field {
        name: "address",
        rules: &[Rule::Required("Please add an address")],
    },
];

const COURSE: &[Field] = &[
    Field {
        name: "title",
        rules: &[Rule::Required("Please add a course title")],
    },
    Field {
        name: "description",
        rules: &[Rule::Required("Please add a description")],
    },
    Field {
        name: "weeks",
        rules: &[
            Rule::Required("Please add number of weeks"),
            Rule::Number("Please add number of weeks"),
        ],
    },
    Field {
        name: "tuition",
        rules: &[
            Rule::Required("Please add a tuition cost"),
            Rule::Number("Please add a tuition cost"),
        ],
    },
    Field {
        name: "minimumSkill",
        rules: &[
            Rule::Required("Please add a minimum skill"),
            Rule::OneOf(
                &["beginner", "intermediate", "advanced"],
                "Minimum skill must be beginner, intermediate or advanced",
            ),
        ],
    },
];

const REVIEW: &[Field] = &[
    Field {
        name: "title",
        rules: &[
            Rule::Required("Please add a title for the review"),
            Rule::MaxLength(100, "Title can not be more than 100 characters"),
        ],
    },
    Field {
        name: "text",
        rules: &[Rule::Required("Please add some text")],
    },
    Field {
        name: "rating",
        rules: &[
            Rule::Required("Please add a rating between 1 and 10"),
            Rule::Range(1.0, 10.0, "Please add a rating between 1 and 10"),
        ],
    },
];

const USER: &[Field] = &[
    Field {
        name: "name",
        rules: &[Rule::Required("Please add a name")],
    },
    Field {
        name: "email",
        rules: &[
            Rule::Required("Please add an email"),
            Rule::Matches(Pattern::Email, "Please add a valid email"),
        ],
    },
    Field {
        name: "role",
        rules: &[Rule::OneOf(
            &["user", "publisher"],
            "Role must be either user or publisher",
        )],
    },
    Field {
        name: "password",
        rules: &[
            Rule::Required("Please add a password"),
            Rule::MinLength(6, "Password must be at least 6 characters"),
        ],
    },
];
