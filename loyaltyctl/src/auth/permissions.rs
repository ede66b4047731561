use crate::{
    api::models::users::{CurrentUser, Role},
    errors::Error,
    types::{Operation, Permission, Resource, UserId},
    AppState,
};
use axum::{extract::FromRequestParts, http::request::Parts};
use std::marker::PhantomData;

pub mod resource {
    use crate::types::Resource;

    // Resource types
    #[derive(Default)]
    pub struct Users;

    #[derive(Default)]
    pub struct Products;

    #[derive(Default)]
    pub struct Orders;

    #[derive(Default)]
    pub struct Points;

    // Convert type-level markers to enum values using Into
    impl From<Users> for Resource {
        fn from(_: Users) -> Resource {
            Resource::Users
        }
    }
    impl From<Products> for Resource {
        fn from(_: Products) -> Resource {
            Resource::Products
        }
    }
    impl From<Orders> for Resource {
        fn from(_: Orders) -> Resource {
            Resource::Orders
        }
    }
    impl From<Points> for Resource {
        fn from(_: Points) -> Resource {
            Resource::Points
        }
    }
}

pub mod operation {
    use crate::types::Operation;

    // Operation types
    #[derive(Default)]
    pub struct CreateAll;

    #[derive(Default)]
    pub struct CreateOwn;

    #[derive(Default)]
    pub struct ReadAll;

    #[derive(Default)]
    pub struct UpdateAll;

    #[derive(Default)]
    pub struct DeleteAll;

    impl From<CreateAll> for Operation {
        fn from(_: CreateAll) -> Operation {
            Operation::CreateAll
        }
    }
    impl From<CreateOwn> for Operation {
        fn from(_: CreateOwn) -> Operation {
            Operation::CreateOwn
        }
    }
    impl From<ReadAll> for Operation {
        fn from(_: ReadAll) -> Operation {
            Operation::ReadAll
        }
    }
    impl From<UpdateAll> for Operation {
        fn from(_: UpdateAll) -> Operation {
            Operation::UpdateAll
        }
    }
    impl From<DeleteAll> for Operation {
        fn from(_: DeleteAll) -> Operation {
            Operation::DeleteAll
        }
    }
}

pub struct RequiresPermission<R, O>
where
    R: Into<Resource> + Default,
    O: Into<Operation> + Default,
{
    pub current_user: CurrentUser,
    _marker: PhantomData<(R, O)>,
}

impl<R, O> FromRequestParts<AppState> for RequiresPermission<R, O>
where
    R: Into<Resource> + Default,
    O: Into<Operation> + Default,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let current_user = CurrentUser::from_request_parts(parts, state).await?;

        let resource = R::default().into();
        let operation = O::default().into();

        if has_permission(&current_user, resource, operation) {
            Ok(RequiresPermission {
                current_user,
                _marker: PhantomData,
            })
        } else {
            Err(Error::InsufficientPermissions {
                required: Permission::Allow(resource, operation),
                action: operation,
                resource: format!("{resource:?}"),
            })
        }
    }
}

// Implement Deref so RequiresPermission<R, O> behaves like CurrentUser
impl<R, O> std::ops::Deref for RequiresPermission<R, O>
where
    R: Into<Resource> + Default,
    O: Into<Operation> + Default,
{
    type Target = CurrentUser;

    fn deref(&self) -> &Self::Target {
        &self.current_user
    }
}

/// Check if a user has permission to perform an operation on a resource
pub fn has_permission(user: &CurrentUser, resource: Resource, operation: Operation) -> bool {
    // Admin users have access to everything
    if user.is_admin {
        return true;
    }

    user.roles.iter().any(|role| role_has_permission(role, resource, operation))
}

/// Check if a role grants permission for a resource/operation
pub fn role_has_permission(role: &Role, resource: Resource, operation: Operation) -> bool {
    match role {
        Role::StandardUser => {
            // Shoppers: browse the catalogue, place orders, see and spend their own points
            matches!(
                (resource, operation),
                (Resource::Users, Operation::ReadOwn)
                    | (Resource::Products, Operation::ReadAll)
                    | (Resource::Orders, Operation::ReadOwn)
                    | (Resource::Orders, Operation::CreateOwn)
                    | (Resource::Points, Operation::ReadOwn)
                    | (Resource::Points, Operation::CreateOwn) // Redeem
            )
        }
        Role::StoreOperator => {
            // Runs the store: catalogue and order lifecycle, can look users up
            matches!(
                (resource, operation),
                (Resource::Products, _) | (Resource::Orders, _) | (Resource::Users, Operation::ReadAll | Operation::ReadOwn)
            )
        }
        Role::LoyaltyManager => {
            // Full access to the ledger, read access to who and what it refers to
            matches!(
                (resource, operation),
                (Resource::Points, _)
                    | (Resource::Users, Operation::ReadAll | Operation::ReadOwn)
                    | (Resource::Orders, Operation::ReadAll | Operation::ReadOwn)
                    | (Resource::Products, Operation::ReadAll)
            )
        }
    }
}

/// Generic helper to check if user can perform an operation on their own resources
/// (combines ID matching and Own permission check)
fn can_perform_own_operation(user: &CurrentUser, resource: Resource, operation: Operation, target_user_id: UserId) -> bool {
    user.id == target_user_id && has_permission(user, resource, operation)
}

/// Generic helper to check if user can perform an operation on all resources (admin-level access)
fn can_perform_all_operation(user: &CurrentUser, resource: Resource, operation: Operation) -> bool {
    has_permission(user, resource, operation)
}

// Macro to generate convenience functions for each operation type
macro_rules! generate_permission_helpers {
    ($operation_name:ident, $all_operation:expr, $own_operation:expr) => {
        paste::paste! {
            /// Check if user can [<$operation_name:lower>] their own resources (combines ID matching and [<$operation_name>]Own permission)
            pub fn [<can_ $operation_name:lower _own_resource>](user: &CurrentUser, resource: Resource, target_user_id: UserId) -> bool {
                can_perform_own_operation(user, resource, $own_operation, target_user_id)
            }

            /// Check if user can [<$operation_name:lower>] all resources of a type (admin-level access)
            pub fn [<can_ $operation_name:lower _all_resources>](user: &CurrentUser, resource: Resource) -> bool {
                can_perform_all_operation(user, resource, $all_operation)
            }
        }
    };
}

// i.e can_read_own_resource, can_read_all_resources, can_create_own_resource, ...
generate_permission_helpers!(read, Operation::ReadAll, Operation::ReadOwn);
generate_permission_helpers!(create, Operation::CreateAll, Operation::CreateOwn);

/// Allow access to a user's data when it is the caller's own (with the Own permission) or the
/// caller holds the All permission.
pub fn can_read_user_resource(user: &CurrentUser, resource: Resource, target_user_id: UserId) -> bool {
    can_read_own_resource(user, resource, target_user_id) || can_read_all_resources(user, resource)
}

/// Error for a caller who lacks `operation` on `resource`
pub fn forbidden(resource: Resource, operation: Operation) -> Error {
    Error::InsufficientPermissions {
        required: Permission::Allow(resource, operation),
        action: operation,
        resource: format!("{resource:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn create_user_with_roles(roles: Vec<Role>, is_admin: bool) -> CurrentUser {
        CurrentUser {
            id: Uuid::new_v4(),
            username: "test".to_string(),
            email: "test@example.com".to_string(),
            is_admin,
            roles,
            display_name: None,
        }
    }

    #[test]
    fn test_admin_bypass() {
        let admin = create_user_with_roles(vec![Role::StandardUser], true);

        assert!(has_permission(&admin, Resource::Users, Operation::CreateAll));
        assert!(has_permission(&admin, Resource::Points, Operation::UpdateAll));
        assert!(has_permission(&admin, Resource::Products, Operation::DeleteAll));
    }

    #[test]
    fn test_standard_user_role() {
        let user = create_user_with_roles(vec![Role::StandardUser], false);

        assert!(has_permission(&user, Resource::Users, Operation::ReadOwn));
        assert!(has_permission(&user, Resource::Products, Operation::ReadAll));
        assert!(has_permission(&user, Resource::Orders, Operation::CreateOwn));
        assert!(has_permission(&user, Resource::Points, Operation::CreateOwn));

        // Cannot adjust balances or see anyone else's data
        assert!(!has_permission(&user, Resource::Points, Operation::UpdateAll));
        assert!(!has_permission(&user, Resource::Points, Operation::ReadAll));
        assert!(!has_permission(&user, Resource::Orders, Operation::UpdateAll));
        assert!(!has_permission(&user, Resource::Products, Operation::CreateAll));
    }

    #[test]
    fn test_store_operator_role() {
        let operator = create_user_with_roles(vec![Role::StoreOperator], false);

        assert!(has_permission(&operator, Resource::Products, Operation::CreateAll));
        assert!(has_permission(&operator, Resource::Orders, Operation::UpdateAll));
        assert!(has_permission(&operator, Resource::Users, Operation::ReadAll));

        // The ledger is off limits
        assert!(!has_permission(&operator, Resource::Points, Operation::UpdateAll));
        assert!(!has_permission(&operator, Resource::Points, Operation::ReadAll));
    }

    #[test]
    fn test_loyalty_manager_role() {
        let manager = create_user_with_roles(vec![Role::LoyaltyManager], false);

        assert!(has_permission(&manager, Resource::Points, Operation::UpdateAll));
        assert!(has_permission(&manager, Resource::Points, Operation::ReadAll));
        assert!(has_permission(&manager, Resource::Orders, Operation::ReadAll));

        assert!(!has_permission(&manager, Resource::Orders, Operation::UpdateAll));
        assert!(!has_permission(&manager, Resource::Products, Operation::CreateAll));
        assert!(!has_permission(&manager, Resource::Users, Operation::CreateAll));
    }

    #[test]
    fn test_multi_role_additive_permissions() {
        let multi_user = create_user_with_roles(vec![Role::StandardUser, Role::LoyaltyManager], false);

        assert!(has_permission(&multi_user, Resource::Orders, Operation::CreateOwn)); // StandardUser
        assert!(has_permission(&multi_user, Resource::Points, Operation::UpdateAll)); // LoyaltyManager

        assert!(!has_permission(&multi_user, Resource::Users, Operation::CreateAll));
    }

    #[test]
    fn test_no_roles_no_permissions() {
        let no_roles = create_user_with_roles(vec![], false);

        assert!(!has_permission(&no_roles, Resource::Users, Operation::ReadOwn));
        assert!(!has_permission(&no_roles, Resource::Points, Operation::CreateOwn));
        assert!(!has_permission(&no_roles, Resource::Products, Operation::ReadAll));
    }

    #[test]
    fn test_permission_helpers() {
        let user = create_user_with_roles(vec![Role::StandardUser], false);
        let other_id = Uuid::new_v4();

        assert!(can_read_own_resource(&user, Resource::Points, user.id));
        assert!(!can_read_own_resource(&user, Resource::Points, other_id));
        assert!(!can_read_all_resources(&user, Resource::Points));
        assert!(can_create_own_resource(&user, Resource::Orders, user.id));
        assert!(!can_create_all_resources(&user, Resource::Orders));

        assert!(can_read_user_resource(&user, Resource::Points, user.id));
        assert!(!can_read_user_resource(&user, Resource::Points, other_id));

        let manager = create_user_with_roles(vec![Role::LoyaltyManager], false);
        assert!(can_read_user_resource(&manager, Resource::Points, other_id));
    }

    #[test]
    fn test_requires_permission_deref() {
        let user = create_user_with_roles(vec![Role::StandardUser], false);
        let requires_permission = RequiresPermission::<resource::Points, operation::CreateOwn> {
            current_user: user.clone(),
            _marker: PhantomData,
        };

        assert_eq!(requires_permission.id, user.id);
        assert_eq!(requires_permission.username, user.username);
        assert_eq!(requires_permission.is_admin, user.is_admin);
    }
}
