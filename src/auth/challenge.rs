/// Parameters of a `Bearer` challenge, sent by a registry in the
/// `WWW-Authenticate` header of a `401` response.
///
/// See <https://distribution.github.io/distribution/spec/auth/token/>
/// for more details.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Challenge {
    /// URL of the token service.
    pub realm: String,

    pub service: Option<String>,

    /// Space-separated list of scopes.
    pub scope: Option<String>,
}

impl Challenge {
    /// Parse a `WWW-Authenticate` header.
    ///
    /// Return `None` if the header can't be parsed, if the scheme is not
    /// `Bearer`, or if there is no `realm`.
    ///
    /// ```
    /// # use oci_referrers::auth::Challenge;
    /// let header = r#"Bearer realm="https://auth.example.com/token",service="registry.example.com""#;
    /// let challenge = Challenge::parse(header).unwrap();
    ///
    /// assert_eq!(challenge.realm, "https://auth.example.com/token");
    /// assert_eq!(challenge.service.as_deref(), Some("registry.example.com"));
    /// assert_eq!(challenge.scope, None);
    /// ```
    pub fn parse(header: &str) -> Option<Challenge> {
        let mut realm = None;
        let mut challenge = Challenge::default();

        // The first token must be `Bearer`
        let mut tail = header.trim_ascii().strip_prefix("Bearer ")?;

        loop {
            let (key, value) = tail.split_once('=')?;
            let key = key.trim_ascii();
            let (value, after) = value.trim_ascii_start().strip_prefix('"')?.split_once('"')?;

            match key {
                "realm" => realm = Some(value),
                "service" => challenge.service = Some(value.to_owned()),
                "scope" => challenge.scope = Some(value.to_owned()),
                _ => (),
            }

            tail = match after.trim_ascii_start() {
                "" => break,
                t => t.strip_prefix(',')?,
            };
        }

        challenge.realm = realm?.to_owned();
        Some(challenge)
    }

    /// Scopes in the `scope` parameter.
    pub fn scopes(&self) -> impl Iterator<Item = &str> {
        self.scope.as_deref().unwrap_or_default().split_ascii_whitespace()
    }
}

#[test]
fn parse_challenges() {
    let challenge = Challenge::parse(
        r#"Bearer service="registry.docker.io", realm="https://auth.docker.io/token",scope="repository:a/b:pull repository:c:pull,push""#,
    )
    .unwrap();

    assert_eq!(challenge.realm, "https://auth.docker.io/token");
    assert_eq!(challenge.service.as_deref(), Some("registry.docker.io"));
    assert_eq!(
        challenge.scopes().collect::<Vec<_>>(),
        ["repository:a/b:pull", "repository:c:pull,push"]
    );

    // Unknown parameters are ignored.
    let challenge = Challenge::parse(r#"Bearer realm="http://x/token",error="insufficient_scope""#);
    assert_eq!(challenge.unwrap().scopes().count(), 0);

    for invalid in [
        r#"Basic realm="registry""#,
        r#"Bearer service="no realm""#,
        r#"Bearer realm=unquoted"#,
        r#"Bearer realm="a" service="missing comma""#,
    ] {
        assert_eq!(Challenge::parse(invalid), None, "{invalid}");
    }
}
