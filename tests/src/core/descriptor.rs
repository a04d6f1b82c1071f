use dexcloak_core::descriptor::{
    boxing, is_wide, register_count, split_parameters, PRIMITIVE_CODES,
};

#[test]
fn test_split_round_trip_over_descriptor_corpus() {
    let corpus = [
        "",
        "I",
        "Z",
        "JD",
        "Ljava/lang/String;",
        "Ljava/lang/String;Ljava/lang/String;",
        "ILjava/lang/String;Z",
        "[I[J[Ljava/lang/Object;",
        "[[[Z",
        "JLandroid/content/Context;[BSC",
        "Landroid/content/Intent;IJ[Ljava/lang/String;D",
    ];
    for descriptor in corpus {
        let tokens = split_parameters(descriptor);
        assert_eq!(
            tokens.concat(),
            descriptor,
            "round trip failed for `{descriptor}`"
        );
    }
}

#[test]
fn test_register_count_matches_wide_rule() {
    let corpus: [(&str, usize); 5] = [
        ("", 0),
        ("I", 1),
        ("ILjava/lang/String;", 2),
        ("IJLjava/lang/String;", 4),
        ("DD[D", 5),
    ];
    for (descriptor, expected) in corpus {
        let tokens = split_parameters(descriptor);
        let wide = tokens.iter().filter(|t| is_wide(t)).count();
        let narrow = tokens.len() - wide;
        assert_eq!(register_count(&tokens), expected);
        assert_eq!(register_count(&tokens), narrow + 2 * wide);
    }
}

#[test]
fn test_boxing_covers_all_primitives_and_nothing_else() {
    for code in PRIMITIVE_CODES {
        assert!(boxing(&code.to_string()).is_some());
    }
    for token in ["V", "Ljava/lang/Integer;", "[J", ""] {
        assert!(boxing(token).is_none());
    }
}
