use licenses_kernel::{
    ColumnDeclaration as Column, ColumnType, Seed, SeedValue, TableDeclaration, TableScope,
};

pub fn roles() -> TableDeclaration {
    TableDeclaration::new("roles", TableScope::Tenant)
        .column(Column::serial_id("id"))
        .column(Column::new("name", ColumnType::Varchar(64)).not_null().unique())
        .column(Column::new("name_ar", ColumnType::Varchar(128)))
        .column(Column::new("description", ColumnType::Text))
}

pub fn branches() -> TableDeclaration {
    TableDeclaration::new("branches", TableScope::Tenant)
        .column(Column::serial_id("id"))
        .column(Column::new("code", ColumnType::Varchar(20)).not_null().unique())
        .column(Column::new("name", ColumnType::Varchar(200)).not_null())
        .column(Column::new("name_en", ColumnType::Varchar(200)))
        .column(
            Column::new("is_active", ColumnType::Boolean)
                .not_null()
                .default_value("TRUE"),
        )
}

pub fn users() -> TableDeclaration {
    TableDeclaration::new("users", TableScope::Tenant)
        .column(Column::serial_id("id"))
        .column(Column::new("username", ColumnType::Varchar(80)).not_null().unique())
        .column(Column::new("email", ColumnType::Varchar(200)).not_null().unique())
        .column(Column::new("full_name", ColumnType::Varchar(200)))
        .column(Column::new("phone", ColumnType::Varchar(50)))
        .column(Column::new("password_hash", ColumnType::Varchar(255)).not_null())
        .column(
            Column::new("is_active", ColumnType::Boolean)
                .not_null()
                .default_value("TRUE"),
        )
        .column(
            Column::new("is_admin", ColumnType::Boolean)
                .not_null()
                .default_value("FALSE"),
        )
        .column(Column::new("role_id", ColumnType::Integer).references("roles", "id"))
        .column(Column::new("branch_id", ColumnType::Integer).references("branches", "id"))
        .column(
            Column::new("created_at", ColumnType::Timestamp)
                .not_null()
                .default_value("CURRENT_TIMESTAMP"),
        )
}

/// Chart of accounts.
pub fn accounts() -> TableDeclaration {
    TableDeclaration::new("accounts", TableScope::Tenant)
        .column(Column::serial_id("id"))
        .column(Column::new("code", ColumnType::Varchar(20)).not_null().unique())
        .column(Column::new("name", ColumnType::Varchar(200)).not_null())
        .column(Column::new("name_en", ColumnType::Varchar(200)))
        .column(Column::new("account_type", ColumnType::Varchar(20)).not_null())
        .column(Column::new("parent_id", ColumnType::Integer).references("accounts", "id"))
        .column(
            Column::new("balance", ColumnType::Numeric(15, 2))
                .not_null()
                .default_value("0"),
        )
        .column(
            Column::new("is_system", ColumnType::Boolean)
                .not_null()
                .default_value("FALSE"),
        )
}

pub fn default_roles() -> Seed {
    [
        ("admin", "مدير النظام", "Full system access"),
        ("manager", "مدير", "Manager access"),
        ("user", "مستخدم", "Basic user access"),
    ]
    .into_iter()
    .fold(
        Seed::new("roles", TableScope::Tenant, "name"),
        |seed, (name, name_ar, description)| {
            seed.row(vec![
                ("name", SeedValue::text(name)),
                ("name_ar", SeedValue::text(name_ar)),
                ("description", SeedValue::text(description)),
            ])
        },
    )
}

pub fn default_branch() -> Seed {
    Seed::new("branches", TableScope::Tenant, "code").row(vec![
        ("code", SeedValue::text("MAIN")),
        ("name", SeedValue::text("الفرع الرئيسي")),
        ("name_en", SeedValue::text("Main Branch")),
        ("is_active", SeedValue::Bool(true)),
    ])
}

pub fn default_accounts() -> Seed {
    [
        ("1000", "الأصول", "Assets", "asset"),
        ("2000", "الخصوم", "Liabilities", "liability"),
        ("3000", "حقوق الملكية", "Equity", "equity"),
        ("4000", "الإيرادات", "Revenue", "revenue"),
        ("5000", "المصروفات", "Expenses", "expense"),
    ]
    .into_iter()
    .fold(
        Seed::new("accounts", TableScope::Tenant, "code"),
        |seed, (code, name, name_en, account_type)| {
            seed.row(vec![
                ("code", SeedValue::text(code)),
                ("name", SeedValue::text(name)),
                ("name_en", SeedValue::text(name_en)),
                ("account_type", SeedValue::text(account_type)),
                ("is_system", SeedValue::Bool(true)),
            ])
        },
    )
}
