pub fn cut(str: String, max_length: usize) -> String {
    if str.len() <= max_length {
        str
    } else {
        str.as_str()[..max_length - 1].to_string()
    }
}

/// Sanitizes an arbitrary string into an OCI repository name: lowercase
/// alphanumerics and dashes, no leading/trailing dash.
pub fn sanitize_oci_repository_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            'a'..='z' | '0'..='9' => out.push(c),
            'A'..='Z' => out.push(c.to_ascii_lowercase()),
            _ => {
                if !out.ends_with('-') {
                    out.push('-');
                }
            }
        }
    }

    out.trim_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cut() {
        assert_eq!(cut("hello".to_string(), 10), "hello");
        assert_eq!(cut("hello".to_string(), 3), "he");
    }

    #[test]
    fn test_sanitize_oci_repository_name() {
        // setup:
        struct TestCase {
            input: &'static str,
            expected: &'static str,
        }

        let test_cases = vec![
            TestCase {
                input: "./k8s",
                expected: "k8s",
            },
            TestCase {
                input: "My App/Manifests",
                expected: "my-app-manifests",
            },
            TestCase {
                input: "---already--dashed---",
                expected: "already-dashed",
            },
        ];

        for tc in test_cases {
            // execute:
            let res = sanitize_oci_repository_name(tc.input);

            // verify:
            assert_eq!(tc.expected, res);
        }
    }
}
