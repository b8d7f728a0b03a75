table! {
    source (id) {
        id -> Integer,
        key -> Varchar,
        citation -> Varchar,
    }
}

table! {
    food (id) {
        id -> Integer,
        name -> Varchar,
        display_name -> Varchar,
        source_id -> Integer,
        essential_present -> Integer,
        amino_data_incomplete -> Bool,
    }
}

table! {
    amino_acid_content (id) {
        id -> Integer,
        food_id -> Integer,
        amino_acid -> Varchar,
        mg_per_100g -> Double,
        source_id -> Integer,
        confidence -> Double,
    }
}

joinable!(food -> source (source_id));
joinable!(amino_acid_content -> food (food_id));

allow_tables_to_appear_in_same_query!(source, food, amino_acid_content);
