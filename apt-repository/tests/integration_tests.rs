use apt_repository::*;
use proptest::prelude::*;

fn arb_description() -> impl Strategy<Value = String> {
    (
        "[A-Za-z][A-Za-z ]{0,18}",
        prop::collection::vec("[a-z.][a-z .]{0,12}", 0..4),
    )
        .prop_map(|(summary, body)| {
            let mut description = summary.trim_end().to_string();
            for line in body {
                description.push_str("\n ");
                description.push_str(line.trim_end());
            }
            description
        })
}

/// Values that start on the line after the field name, like `Conffiles`.
fn arb_conffiles() -> impl Strategy<Value = String> {
    prop::collection::vec(("[a-z]{1,8}", "[0-9a-f]{32}"), 1..4).prop_map(|entries| {
        entries
            .iter()
            .map(|(name, md5)| format!("\n /etc/{}.conf {}", name, md5))
            .collect()
    })
}

fn arb_package() -> impl Strategy<Value = Package> {
    (
        "[a-z][a-z0-9]{0,5}",
        prop::sample::select(vec!["amd64", "i386", "all"]),
        (0u32..20, 0u32..20),
        0u64..100_000,
        prop::option::of(arb_description()),
        prop::option::of("[a-z]{1,8}"),
        prop::option::of(arb_conffiles()),
    )
        .prop_map(|(name, arch, (major, minor), size, description, extra, conffiles)| {
            let version: debversion::Version = format!("{}.{}", major, minor).parse().unwrap();
            let filename = format!("pool/main/{}_{}.deb", name, arch);
            let mut package = Package::new(name.as_str(), version, arch, filename.as_str(), size);
            package.description = description;
            if let Some(extra) = extra {
                package.additional_fields.insert("X-Extra", extra);
            }
            if let Some(conffiles) = conffiles {
                package.additional_fields.insert("Conffiles", conffiles);
            }
            let (_, hashes) = hash::hash_data(filename.as_bytes(), DEFAULT_HASH_ALGORITHMS);
            package.hashes = hashes;
            package
        })
}

fn build(packages: &[Package]) -> PackageFile {
    let mut file = PackageFile::new();
    for package in packages {
        file.insert(package.clone());
    }
    file
}

proptest! {
    #[test]
    fn merge_is_idempotent(packages in prop::collection::vec(arb_package(), 0..8), extra in arb_package()) {
        let base = build(&packages);
        let once = base.with_package(extra.clone());
        let twice = once.with_package(extra);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn merge_keeps_identity_unique(packages in prop::collection::vec(arb_package(), 0..16)) {
        let file = build(&packages);
        let mut keys: Vec<_> = file.packages().map(|p| p.key()).collect();
        let total = keys.len();
        keys.dedup();
        prop_assert_eq!(keys.len(), total);

        let distinct: std::collections::BTreeSet<_> = packages.iter().map(|p| p.key()).collect();
        prop_assert_eq!(file.len(), distinct.len());
    }

    #[test]
    fn serialization_roundtrips(packages in prop::collection::vec(arb_package(), 0..8)) {
        let file = build(&packages);
        let parsed: PackageFile = file.to_string().parse().unwrap();
        prop_assert_eq!(parsed, file);
    }

    #[test]
    fn serialization_ignores_merge_order(packages in prop::collection::vec(arb_package(), 0..8)) {
        // Deduplicate first so the last-writer-wins rule doesn't depend on order.
        let mut unique = std::collections::BTreeMap::new();
        for package in packages {
            unique.insert(package.key(), package);
        }
        let forward: Vec<_> = unique.values().cloned().collect();
        let mut backward = forward.clone();
        backward.reverse();
        prop_assert_eq!(build(&forward).to_string(), build(&backward).to_string());
    }
}

#[test]
fn test_unknown_fields_survive_reserialization() {
    let text = "\
Package: foo
Version: 1.0
Architecture: amd64
Maintainer: Jane Doe <jane@example.com>
Multi-Arch: same
Description: frobnicate things
 Extended description
 .
 More text.
Original-Maintainer: Someone Else <else@example.com>
Conffiles:
 /etc/foo.conf 0123456789abcdef
Filename: pool/main/f/foo/foo_1.0_amd64.deb
Size: 1234
MD5sum: 0123
SHA256: 4567
";
    let parsed: PackageFile = text.parse().unwrap();
    let reparsed: PackageFile = parsed.to_string().parse().unwrap();
    assert_eq!(reparsed, parsed);

    let package = parsed.get(&PackageKey::new("foo", "amd64")).unwrap();
    assert_eq!(package.additional_fields.get("Multi-Arch"), Some("same"));
    assert_eq!(
        package.additional_fields.get("Conffiles"),
        Some("\n /etc/foo.conf 0123456789abcdef")
    );
    assert_eq!(
        package.description.as_deref(),
        Some("frobnicate things\n Extended description\n .\n More text.")
    );
    assert!(parsed.to_string().contains("Conffiles:\n /etc/foo.conf 0123456789abcdef\n"));
}

#[test]
fn test_release_lists_index_files() {
    let mut index = PackageFile::new();
    let control = Stanza::parse("Package: foo\nVersion: 1.0\nArchitecture: amd64\n").unwrap();
    let (size, hashes) = hash::hash_data(b"deb", DEFAULT_HASH_ALGORITHMS);
    index.insert(Package::from_control(&control, hashes, "pool/main/f/foo/foo_1.0_amd64.deb", size).unwrap());

    let plain = index.to_string().into_bytes();
    let gz = Compression::Gzip.compress(&plain).unwrap();

    let release = ReleaseBuilder::new()
        .codename("stable")
        .components(vec!["main".to_string()])
        .architectures(vec!["amd64".to_string()])
        .add_file(HashedFile::from_data("main/binary-amd64/Packages", &plain, DEFAULT_HASH_ALGORITHMS))
        .add_file(HashedFile::from_data("main/binary-amd64/Packages.gz", &gz, DEFAULT_HASH_ALGORITHMS))
        .build();

    let parsed: Release = release.to_string().parse().unwrap();
    let entry = parsed.get_file("main/binary-amd64/Packages").unwrap();
    assert_eq!(entry.size, plain.len() as u64);
    let (_, expected) = hash::hash_data(&plain, DEFAULT_HASH_ALGORITHMS);
    assert_eq!(entry.hashes, expected);
    assert_eq!(Compression::Gzip.decompress(&gz).unwrap(), plain);
}
