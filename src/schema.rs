diesel::table! {
    etl_monitoring (id) {
        id -> Int4,
        resource_id -> Text,
        table_name -> Text,
        load_time -> Timestamptz,
        row_count -> Int4,
        notes -> Text,
    }
}
